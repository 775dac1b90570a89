//! crates/bookworm_core/src/prompt.rs
//!
//! Mode resolution and prompt assembly for the generation gateway.

use serde::Serialize;
use std::fmt;

use crate::domain::{CanonDocument, Message, MessageRole};

pub const CANON_TRUNCATION_MARKER: &str = "\n\n...[canon truncated]...";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Book Worm AI, an assistant for:

- Storytelling & book writing
- Game development
- Music & lyrics
- Language creation
- Concept art prompts

Obey LOCKED CANON when provided. Infer the active domain from tags like:
[DOMAIN: STORYTELLING], [DOMAIN: GAME_DEV], [DOMAIN: MUSIC_DEV],
[DOMAIN: BOOK], [DOMAIN: LANGUAGE_LAB], [DOMAIN: CODING].

Respond clearly, structurally, and in depth."#;

const CANON_PREAMBLE: &str =
    "The following is LOCKED CANON for this project. You MUST obey it and avoid contradictions:\n\n";

//=========================================================================================
// Modes
//=========================================================================================

/// A resolved generation mode. `auto` never survives resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Lore,
    World,
    Character,
    Block,
    Free,
    Lyrics,
    InstrumentalConcept,
    AudioConcept,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Lore => "lore",
            Mode::World => "world",
            Mode::Character => "character",
            Mode::Block => "block",
            Mode::Free => "free",
            Mode::Lyrics => "lyrics",
            Mode::InstrumentalConcept => "instrumental_concept",
            Mode::AudioConcept => "audio_concept",
        }
    }

    /// The framing line appended to the base system instruction.
    fn framing(&self) -> &'static str {
        match self {
            Mode::Lore => "Focus on lore, canon and timelines. Keep every fact consistent with LOCKED CANON.",
            Mode::World => "Focus on worldbuilding: realms, cultures, ecology and systems of power.",
            Mode::Character => "Produce character work: profiles, backstories, motivations and voice.",
            Mode::Block => "Write or rewrite prose blocks: scenes, chapters and paragraphs ready for the manuscript.",
            Mode::Free => "Answer freely and helpfully.",
            Mode::Lyrics => "Write song lyrics with clear structure (verses, chorus, hook).",
            Mode::InstrumentalConcept => "Describe instrumental and score concepts: tempo, instrumentation, mood.",
            Mode::AudioConcept => "Describe sound design concepts: ambience, effects and audio direction.",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The requested mode after alias normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedMode {
    Auto,
    Fixed(Mode),
}

const MODE_ALIASES: &[(&str, Mode)] = &[
    ("lore", Mode::Lore),
    ("canon", Mode::Lore),
    ("history", Mode::Lore),
    ("timeline", Mode::Lore),
    ("world", Mode::World),
    ("worldbuilding", Mode::World),
    ("realm", Mode::World),
    ("character", Mode::Character),
    ("char", Mode::Character),
    ("npc", Mode::Character),
    ("block", Mode::Block),
    ("scene", Mode::Block),
    ("chapter", Mode::Block),
    ("writing", Mode::Block),
    ("book", Mode::Block),
    ("free", Mode::Free),
    ("chat", Mode::Free),
    ("general", Mode::Free),
    ("lyrics", Mode::Lyrics),
    ("lyric", Mode::Lyrics),
    ("song", Mode::Lyrics),
    ("music", Mode::Lyrics),
    ("instrumental_concept", Mode::InstrumentalConcept),
    ("instrumental", Mode::InstrumentalConcept),
    ("beat", Mode::InstrumentalConcept),
    ("ost", Mode::InstrumentalConcept),
    ("audio_concept", Mode::AudioConcept),
    ("audio", Mode::AudioConcept),
    ("sfx", Mode::AudioConcept),
];

/// Normalizes a mode or tab name. Empty input means `auto`; unknown names fall back to free.
pub fn normalize_mode(raw: &str) -> RequestedMode {
    let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
    if key.is_empty() || key == "auto" {
        return RequestedMode::Auto;
    }
    MODE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, mode)| RequestedMode::Fixed(*mode))
        .unwrap_or(RequestedMode::Fixed(Mode::Free))
}

const INFERENCE_RULES: &[(&[&str], Mode)] = &[
    (&["lyrics", "chorus", "verse", "hook"], Mode::Lyrics),
    (&["beat", "808", "instrumental", "ost"], Mode::InstrumentalConcept),
    (&["sound effect", "sfx", "ambience", "audio design"], Mode::AudioConcept),
    (
        &[
            "character sheet",
            "character profile",
            "backstory",
            "origin story",
            "build me a character",
            "design a character",
        ],
        Mode::Character,
    ),
    (
        &[
            "realm", "continent", "planet", "world map", "biome", "region", "climate", "flora",
            "fauna", "creature", "monster", "species", "culture", "tribe", "kingdom", "empire",
            "magic system", "power system", "tech system",
        ],
        Mode::World,
    ),
    (&["lore", "canon", "timeline", "summarize my world", "explain my world"], Mode::Lore),
    (
        &["rewrite this", "fix this paragraph", "edit this scene", "write a scene", "write a chapter"],
        Mode::Block,
    ),
];

/// Keyword heuristic used when the caller asks for `auto`. First matching rule wins.
pub fn infer_mode(prompt: &str) -> Mode {
    let text = prompt.to_lowercase();
    INFERENCE_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| text.contains(needle)))
        .map(|(_, mode)| *mode)
        .unwrap_or(Mode::Free)
}

pub fn resolve_mode(requested: RequestedMode, prompt: &str) -> Mode {
    match requested {
        RequestedMode::Auto => infer_mode(prompt),
        RequestedMode::Fixed(mode) => mode,
    }
}

//=========================================================================================
// Assembly
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: PromptRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PromptRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: PromptRole::Assistant, content: content.into() }
    }
}

impl From<&Message> for PromptMessage {
    fn from(message: &Message) -> Self {
        match message.role {
            MessageRole::User => PromptMessage::user(message.content.clone()),
            MessageRole::Assistant => PromptMessage::assistant(message.content.clone()),
        }
    }
}

/// Truncates `text` to `budget` characters, appending the marker when anything was cut.
pub fn truncate_with_marker(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{}", &text[..cut], CANON_TRUNCATION_MARKER),
    }
}

/// Joins documents as `# title\nbody` blocks and bounds the result. Empty input yields `None`.
pub fn build_canon_context(docs: &[CanonDocument], budget: usize) -> Option<String> {
    if docs.is_empty() {
        return None;
    }
    let joined = docs
        .iter()
        .map(|doc| format!("# {}\n{}", doc.title, doc.body))
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(truncate_with_marker(&joined, budget))
}

pub fn user_turn(mode: Mode, depth: &str, prompt: &str) -> String {
    format!("Mode: {mode}\nDepth: {depth}\n\nUser prompt:\n{prompt}")
}

/// Everything that goes into one generation call.
pub struct PromptParts<'a> {
    pub base_instruction: &'a str,
    pub mode: Mode,
    pub depth: &'a str,
    pub canon: Option<&'a str>,
    /// Chronological order (oldest first).
    pub history: &'a [Message],
    pub prompt: &'a str,
}

/// Builds the ordered sequence: system → canon → history → new user turn.
pub fn assemble_messages(parts: &PromptParts<'_>) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(parts.history.len() + 3);
    messages.push(PromptMessage::system(format!(
        "{}\n\n{}",
        parts.base_instruction.trim(),
        parts.mode.framing()
    )));
    if let Some(canon) = parts.canon {
        messages.push(PromptMessage::system(format!("{CANON_PREAMBLE}{canon}")));
    }
    messages.extend(parts.history.iter().map(PromptMessage::from));
    messages.push(PromptMessage::user(user_turn(parts.mode, parts.depth, parts.prompt)));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn doc(title: &str, body: &str) -> CanonDocument {
        CanonDocument {
            id: 1,
            project_id: Some(1),
            owner_id: None,
            title: title.to_string(),
            body: body.to_string(),
            tags: Vec::new(),
            canon_state: "LOCKED_CANON".into(),
            source: "manual-import".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn aliases_normalize_to_modes() {
        assert_eq!(normalize_mode("auto"), RequestedMode::Auto);
        assert_eq!(normalize_mode(""), RequestedMode::Auto);
        assert_eq!(normalize_mode("Scene"), RequestedMode::Fixed(Mode::Block));
        assert_eq!(normalize_mode("world-building"), RequestedMode::Fixed(Mode::Free));
        assert_eq!(normalize_mode("worldbuilding"), RequestedMode::Fixed(Mode::World));
        assert_eq!(normalize_mode("audio concept"), RequestedMode::Fixed(Mode::AudioConcept));
        assert_eq!(normalize_mode("nonsense"), RequestedMode::Fixed(Mode::Free));
    }

    #[test]
    fn auto_infers_from_keywords() {
        assert_eq!(infer_mode("write a scene in the tavern"), Mode::Block);
        assert_eq!(infer_mode("Give me a chorus about rain"), Mode::Lyrics);
        assert_eq!(infer_mode("describe the northern continent"), Mode::World);
        assert_eq!(infer_mode("what's the timeline so far"), Mode::Lore);
        assert_eq!(infer_mode("hello there"), Mode::Free);
        assert_eq!(resolve_mode(RequestedMode::Fixed(Mode::Lore), "write a scene"), Mode::Lore);
    }

    #[test]
    fn worldbuilding_and_character_keywords_cover_the_full_vocabulary() {
        assert_eq!(infer_mode("design a tribe of river folk"), Mode::World);
        assert_eq!(infer_mode("list the flora and fauna of the marsh"), Mode::World);
        assert_eq!(infer_mode("what is the climate of this region"), Mode::World);
        assert_eq!(infer_mode("a monster species for the caves"), Mode::World);
        assert_eq!(infer_mode("outline the empire's culture"), Mode::World);
        assert_eq!(infer_mode("invent a power system"), Mode::World);
        assert_eq!(infer_mode("and a tech system too"), Mode::World);
        assert_eq!(infer_mode("build me a character for act two"), Mode::Character);
        assert_eq!(infer_mode("summarize my world"), Mode::Lore);
    }

    #[test]
    fn short_canon_is_not_truncated() {
        let ctx = build_canon_context(&[doc("A", "short")], 4000).unwrap();
        assert_eq!(ctx, "# A\nshort");
        assert!(build_canon_context(&[], 4000).is_none());
    }

    #[test]
    fn long_canon_is_bounded_by_budget_plus_marker() {
        let docs = vec![doc("First", &"x".repeat(3000)), doc("Second", &"y".repeat(3000))];
        let budget = 4000;
        let ctx = build_canon_context(&docs, budget).unwrap();
        assert!(ctx.ends_with(CANON_TRUNCATION_MARKER));
        assert_eq!(ctx.chars().count(), budget + CANON_TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let cut = truncate_with_marker(&text, 4);
        assert!(cut.starts_with("éééé\n"));
        assert_eq!(truncate_with_marker("abc", 3), "abc");
    }

    #[test]
    fn messages_are_ordered_system_canon_history_user() {
        let user_id = Uuid::new_v4();
        let history = vec![
            Message {
                id: 1,
                user_id,
                tab: "auto".into(),
                role: MessageRole::User,
                content: "earlier question".into(),
                created_at: Utc::now(),
            },
            Message {
                id: 2,
                user_id,
                tab: "auto".into(),
                role: MessageRole::Assistant,
                content: "earlier answer".into(),
                created_at: Utc::now(),
            },
        ];
        let messages = assemble_messages(&PromptParts {
            base_instruction: "BASE",
            mode: Mode::Block,
            depth: "deep",
            canon: Some("# A\nbody"),
            history: &history,
            prompt: "write a scene",
        });

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, PromptRole::System);
        assert!(messages[0].content.starts_with("BASE"));
        assert!(messages[1].content.contains("LOCKED CANON"));
        assert_eq!(messages[2], PromptMessage::user("earlier question"));
        assert_eq!(messages[3], PromptMessage::assistant("earlier answer"));
        assert_eq!(
            messages[4].content,
            "Mode: block\nDepth: deep\n\nUser prompt:\nwrite a scene"
        );
    }
}
