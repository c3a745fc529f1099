//! Prompt assets and reply post-processing.
//!
//! The Korean prompt texts are data assets under `assets/prompts/`, loaded
//! verbatim; code only substitutes persona/scenario/transcript fields.

use nova_core::Persona;
use regex::Regex;
use std::sync::OnceLock;

/// Literal the customer model emits to end the conversation.
pub const END_TOKEN: &str = "<대화 종료>";

/// Minimum transcript length before the auto-close check may fire.
pub const MIN_DIALOGUE_LENGTH: usize = 12;

const CUSTOMER_SYSTEM: &str = include_str!("../assets/prompts/customer_system.txt");
const GREETING: &str = include_str!("../assets/prompts/greeting.txt");
const SCORING: &str = include_str!("../assets/prompts/scoring.txt");
const SUMMARY_COMPRESS: &str = include_str!("../assets/prompts/summary_compress.txt");
const SIMPLE_CHAT: &str = include_str!("../assets/prompts/simple_chat.txt");

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

fn persona_vars<'a>(persona: &'a Persona, scenario: &'a str) -> Vec<(&'static str, &'a str)> {
    vec![
        ("age_group", persona.age_group.as_str()),
        ("gender", persona.gender.as_str()),
        ("personality", persona.personality.as_str()),
        ("tech", persona.tech.as_str()),
        ("goal", persona.goal.as_str()),
        ("usage", persona.usage.as_str()),
        ("type", persona.kind.as_str()),
        ("scenario", scenario),
    ]
}

/// Customer system prompt for a persona in a scenario.
#[must_use]
pub fn customer_system(persona: &Persona, scenario_description: &str) -> String {
    render(CUSTOMER_SYSTEM, &persona_vars(persona, scenario_description))
}

/// First-greeting prompt.
#[must_use]
pub fn greeting(persona: &Persona, scenario_description: &str) -> String {
    render(GREETING, &persona_vars(persona, scenario_description))
}

/// Rubric scoring prompt over a full transcript.
#[must_use]
pub fn scoring(transcript: &str) -> String {
    render(SCORING, &[("transcript", transcript)])
}

/// Summary-compression prompt.
#[must_use]
pub fn summary_compress(summary: &str) -> String {
    render(SUMMARY_COMPRESS, &[("summary", summary)])
}

/// Preamble of the persona-free chat engine.
#[must_use]
pub fn simple_chat_preamble() -> &'static str {
    SIMPLE_CHAT
}

/// Strip accidental speaker prefixes and wrapping quotes from a model reply.
#[must_use]
pub fn clean_reply(reply: &str) -> String {
    let mut text = reply.trim().to_string();
    for prefix in ["고객:", "고객(나):", "AI:", "응답:"] {
        if let Some(stripped) = text.strip_prefix(prefix) {
            text = stripped.trim().to_string();
        }
    }
    text.trim_matches(['"', '\''].as_slice()).to_string()
}

/// Strip markdown decoration for the plain chat engine.
#[must_use]
pub fn strip_markdown(text: &str) -> String {
    static DECORATION: OnceLock<Regex> = OnceLock::new();
    static NEWLINES: OnceLock<Regex> = OnceLock::new();
    let decoration =
        DECORATION.get_or_init(|| Regex::new(r"[`*_#\[\]()>~-]").expect("static regex"));
    let newlines = NEWLINES.get_or_init(|| Regex::new(r"\n+").expect("static regex"));
    let plain = decoration.replace_all(text, "");
    newlines.replace_all(&plain, " ").trim().to_string()
}

/// Extract a 0–100 score from the analysis text.
///
/// Tries the patterns the rubric prompt elicits, most specific first; falls
/// back to 0 when nothing matches.
#[must_use]
pub fn extract_score(analysis: &str) -> f64 {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"총점[:\s]*(\d+(?:\.\d+)?)",
            r"점수[:\s]*\**\s*(\d+(?:\.\d+)?)",
            r"(\d+(?:\.\d+)?)\s*/\s*100",
            r"(\d+(?:\.\d+)?)점",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    });
    for pattern in patterns {
        if let Some(caps) = pattern.captures(analysis) {
            if let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) {
                if (0.0..=100.0).contains(&value) {
                    return value;
                }
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persona() -> Persona {
        Persona {
            age_group: "30대".into(),
            gender: "여성".into(),
            personality: "신중함".into(),
            tech: "중간".into(),
            goal: "세탁기 교체".into(),
            usage: "가족용".into(),
            kind: "신중형".into(),
        }
    }

    #[test]
    fn customer_prompt_substitutes_persona_fields() {
        let prompt = customer_system(&persona(), "매장 첫 방문 상담");
        assert!(prompt.contains("30대 여성 고객"));
        assert!(prompt.contains("- 성격: 신중함"));
        assert!(prompt.contains("- 시나리오: 매장 첫 방문 상담"));
        assert!(!prompt.contains("{age_group}"));
    }

    #[test]
    fn customer_prompt_keeps_end_token_instruction() {
        let prompt = customer_system(&persona(), "x");
        assert!(prompt.contains(END_TOKEN));
    }

    #[test]
    fn greeting_prompt_substitutes_all_fields() {
        let prompt = greeting(&persona(), "상담");
        assert!(!prompt.contains('{'));
        assert!(prompt.contains("[고객 첫마디]"));
    }

    #[test]
    fn clean_reply_strips_prefixes_and_quotes() {
        assert_eq!(clean_reply("고객: 안녕하세요"), "안녕하세요");
        assert_eq!(clean_reply("AI: 반갑습니다"), "반갑습니다");
        assert_eq!(clean_reply("\"요즘 뭐가 인기예요?\""), "요즘 뭐가 인기예요?");
        assert_eq!(clean_reply("  그냥 응답  "), "그냥 응답");
    }

    #[test]
    fn strip_markdown_flattens_decoration() {
        assert_eq!(strip_markdown("**굵게** 그리고\n\n`코드`"), "굵게 그리고 코드");
    }

    #[test]
    fn score_extraction_handles_rubric_formats() {
        assert_eq!(extract_score("**점수**: 85/100점"), 85.0);
        assert_eq!(extract_score("총점: 72.5"), 72.5);
        assert_eq!(extract_score("최종 60/100"), 60.0);
        assert_eq!(extract_score("대화 내용이 없습니다"), 0.0);
    }

    #[test]
    fn score_out_of_range_is_ignored() {
        assert_eq!(extract_score("점수: 300"), 0.0);
    }
}
