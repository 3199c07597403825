use serde_json::json;
use tandem_models::{
    AnalysisBundle, BiasParameters, Candidate, NewsItem, SocialDataPacket, SocialMetrics,
};

use crate::error::AgentError;

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Shared analysis fields, embedded in the scout and news schemas.
fn analysis_schema() -> serde_json::Value {
    json!({
        "recommendation": "buy | sell | hold",
        "confidence": "0-100",
        "reasoning": "<concise analysis naming the signals used>",
        "risk_warning": "<one sentence, or null>",
        "key_factors": ["<most important first>"],
        "contrarian_note": "<strongest case against your call, or null>"
    })
}

fn scout_schema() -> String {
    let mut schema = analysis_schema();
    schema["social"] = json!({
        "raw_sentiment": "0.0-1.0 (0 bearish, 1 bullish)",
        "mention_count": 0,
        "themes": ["<recurring topics>"],
        "source_breakdown": {"<source>": 0},
        "extraction_confidence": "0.0-1.0"
    });
    pretty(&schema)
}

pub fn scout_system_prompt() -> String {
    format!(
        "You are the scout model in a two-model stock analysis pipeline. You see the full \
         signal bundle for one symbol and give a fast, broad first read.\n\n\
         ## INPUT\n\n\
         The user message is a JSON object with `symbol`, `base_confidence` (the caller's \
         prior, 0.0-1.0) and the sub-bundles `technical`, `options_flow`, `catalysts`, \
         `unusual_volume`, `news` and `social`.\n\n\
         ## TASK\n\n\
         1. Read the technical, options flow, catalyst and volume data and decide buy, sell \
         or hold. Start from `base_confidence` x 100 and move it by the evidence.\n\
         2. Extract the raw social signal from `social.sources`: overall sentiment on 0.0-1.0, \
         total mentions, recurring themes and mentions per source. Do not editorialise; a \
         second model refines this extract.\n\n\
         ## WARNING CONDITIONS\n\n\
         Fill `risk_warning` when earnings fall within 7 days, when unusual volume contradicts \
         the price trend, or when social mentions spike without a news catalyst.\n\n\
         You MUST respond with ONLY a JSON object matching this schema:\n\
         {}\n\n\
         `confidence` is a number between 0 and 100.",
        scout_schema()
    )
}

pub fn sentiment_refinement_system_prompt() -> String {
    let schema = json!({
        "sentiment_score": "0.0-1.0 (0 bearish, 1 bullish)",
        "recommendation": "buy | sell | hold",
        "confidence": "0-100",
        "reasoning": "<why the refined score differs from the raw extract, if it does>",
        "narrative": "<the dominant story in one sentence>",
        "risk_warning": "<one sentence, or null>",
        "key_factors": ["<most important first>"]
    });
    format!(
        "You are the sentiment refinement model in a two-model stock analysis pipeline. \
         A faster scout model extracted a raw social signal; your job is to turn it into a \
         considered narrative sentiment score.\n\n\
         ## INPUT\n\n\
         The user message is the scout's social extract: `raw_sentiment`, `mention_count`, \
         `themes`, `source_breakdown` and `extraction_confidence`.\n\n\
         ## RULES\n\n\
         - Discount hype: high mentions with a single theme and one dominant source is \
         often a pump, pull the score toward 0.5.\n\
         - Low `extraction_confidence` (< 0.4) means the extract is thin, stay near 0.5 \
         unless the themes are unambiguous.\n\
         - A score above 0.6 is bullish, below 0.4 bearish.\n\n\
         You MUST respond with ONLY a JSON object matching this schema:\n\
         {}",
        pretty(&schema)
    )
}

pub fn news_system_prompt() -> String {
    format!(
        "You are the news analyst in a two-model stock analysis pipeline. Score the raw \
         news for one symbol independently of any social data.\n\n\
         ## INPUT\n\n\
         The user message is a JSON object with `symbol` and `news`, a list of items with \
         `headline`, optional `summary`, `source` and `published_at`. Newer items matter more.\n\n\
         ## RULES\n\n\
         - Guidance raises, beats and upgrades are bullish; cuts, misses, downgrades, \
         investigations and dilution are bearish.\n\
         - With no news at all, answer hold with confidence 50.\n\n\
         You MUST respond with ONLY a JSON object matching this schema:\n\
         {}",
        pretty(&analysis_schema())
    )
}

pub fn arbiter_system_prompt() -> String {
    let schema = json!({
        "decisions": [{
            "symbol": "<one of the candidate symbols>",
            "action": "buy | sell | hold",
            "confidence": "0-100",
            "rationale": "<one or two sentences>"
        }],
        "summary": "<overall market read, optional>"
    });
    format!(
        "You are the final arbiter for a daily stock shortlist. Each candidate carries an \
         upstream composite `score` and enrichment `signals` (chart patterns, social score, \
         consensus summary).\n\n\
         ## LEARNED BIAS\n\n\
         The user message includes `bias`: weights for technical, sentiment and vision \
         signals learned from past outcomes, plus free-form `notes`. Weigh the signals \
         accordingly. Picks below `min_confidence` should be hold.\n\n\
         ## RULES\n\n\
         - Only decide on symbols present in `candidates`.\n\
         - Return at least one decision.\n\n\
         You MUST respond with ONLY a JSON object matching this schema:\n\
         {}",
        pretty(&schema)
    )
}

pub fn vision_system_prompt() -> String {
    let schema = json!({
        "patterns": {
            "breakout": false,
            "bull_flag": false,
            "double_bottom": false,
            "cup_and_handle": false,
            "head_and_shoulders": false,
            "descending_triangle": false
        },
        "notes": "<optional>"
    });
    format!(
        "You are a chart pattern classifier. The user message describes one symbol's \
         recent daily chart. Flag only patterns that are clearly formed; when unsure, \
         leave the flag false.\n\n\
         You MUST respond with ONLY a JSON object matching this schema:\n\
         {}",
        pretty(&schema)
    )
}

pub fn social_system_prompt() -> String {
    let schema = json!({
        "sentiment_score": "-1.0 to 1.0 (-1 bearish, 1 bullish)",
        "mentions": 0,
        "summary": "<one sentence>"
    });
    format!(
        "You score retail social sentiment for one symbol. The user message holds \
         per-source metrics (`mentions`, source `sentiment` on -1..1, sample `posts`). \
         Weigh sources by mentions, discount obvious spam.\n\n\
         You MUST respond with ONLY a JSON object matching this schema:\n\
         {}",
        pretty(&schema)
    )
}

/// Cap `text` at `max_chars` characters. An oversized text is cut on a char
/// boundary and ends with `[truncated N chars]`. The result never exceeds
/// `max_chars`; a budget too small for the marker gets a clipped marker.
pub fn truncate_to_budget(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    // Sized for the largest possible N so the final length stays in budget.
    let marker_len = format!("\n[truncated {total} chars]").chars().count();
    if marker_len >= max_chars {
        return format!("[truncated {total} chars]")
            .chars()
            .take(max_chars)
            .collect();
    }
    let keep = max_chars.saturating_sub(marker_len);
    let cut = text
        .char_indices()
        .nth(keep)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    format!("{}\n[truncated {} chars]", &text[..cut], total - keep)
}

pub fn render_scout_prompt(bundle: &AnalysisBundle) -> Result<String, AgentError> {
    let body = json!({
        "symbol": bundle.symbol,
        "base_confidence": bundle.base_confidence,
        "technical": bundle.technical,
        "options_flow": bundle.options_flow,
        "catalysts": bundle.catalysts,
        "unusual_volume": bundle.unusual_volume,
        "news": bundle.news,
        "social": bundle.social,
    });
    Ok(serde_json::to_string_pretty(&body)?)
}

pub fn render_refinement_prompt(packet: &SocialDataPacket) -> Result<String, AgentError> {
    Ok(serde_json::to_string_pretty(packet)?)
}

pub fn render_news_prompt(symbol: &str, news: &[NewsItem]) -> Result<String, AgentError> {
    let body = json!({ "symbol": symbol, "news": news });
    Ok(serde_json::to_string_pretty(&body)?)
}

pub fn render_arbitration_prompt(
    candidates: &[Candidate],
    bias: &BiasParameters,
) -> Result<String, AgentError> {
    let body = json!({ "bias": bias, "candidates": candidates });
    Ok(serde_json::to_string_pretty(&body)?)
}

pub fn render_vision_prompt(symbol: &str, chart_summary: &str) -> String {
    format!("Symbol: {symbol}\n\nChart:\n{chart_summary}")
}

pub fn render_social_prompt(symbol: &str, metrics: &SocialMetrics) -> Result<String, AgentError> {
    let body = json!({ "symbol": symbol, "sources": metrics.sources });
    Ok(serde_json::to_string_pretty(&body)?)
}
