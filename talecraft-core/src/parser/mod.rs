//! Parses narrator replies into typed narrative steps and state deltas.
//!
//! The narrator is instructed to emit a line-oriented marker grammar:
//!
//! ```text
//! [MISSION: true|false]
//! [NARRATION: text]
//! [DIALOGUE: characterId, "text"]
//! [HINT: text]
//! [CHANGE: actor, attribute, ±N]
//! [CHANGE: RELATIONSHIP, npc, ±N]
//! [CHANGE: item, 获得|丢失, N]
//! [CHOICE: title] ... [OPTION: text] ... [END_CHOICE]
//! ```
//!
//! Parsing never fails: malformed or unknown markers are coerced to
//! narration, and bare `Name: "text"` lines are recognized as dialogue.

mod deltas;

pub use deltas::{DeltaBundle, ItemAction, ItemChange};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

lazy_static! {
    /// Actor names that address the player in attribute changes.
    static ref PLAYER_ALIASES: BTreeSet<&'static str> = BTreeSet::from(["玩家", "player", "hero"]);
}

/// One atomic narrative unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Narration {
        text: String,
    },
    Dialogue {
        character_id: String,
        text: String,
    },
    Hint {
        text: String,
        changes: Vec<Change>,
    },
    Choice {
        title: String,
        description: String,
        options: Vec<String>,
    },
}

/// One state change attached to a hint step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Attribute {
        actor: String,
        name: String,
        delta: i64,
    },
    Relationship {
        npc: String,
        delta: i64,
    },
    Item {
        name: String,
        action: ItemAction,
        quantity: u32,
    },
}

/// The full result of parsing one reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReply {
    pub steps: Vec<Step>,
    pub deltas: DeltaBundle,
    /// The `[MISSION: true]` flag, consumed rather than emitted as a step.
    pub mission_requested: bool,
    /// All choice options in order, for the client's action panel.
    pub options: Vec<String>,
}

/// Whether an actor name addresses the player.
pub fn is_player_alias(actor: &str) -> bool {
    let lowered = actor.to_lowercase();
    PLAYER_ALIASES.contains(actor) || PLAYER_ALIASES.contains(lowered.as_str())
}

/// Parse a narrator reply. Never fails.
pub fn parse(reply: &str) -> ParsedReply {
    Parser::default().run(reply)
}

#[derive(Default)]
struct Parser {
    out: ParsedReply,
    /// Set while the last pushed step is a hint still absorbing changes.
    hint_open: bool,
    choice: Option<ChoiceBuilder>,
}

#[derive(Default)]
struct ChoiceBuilder {
    title: String,
    description: Vec<String>,
    options: Vec<String>,
}

impl Parser {
    fn run(mut self, reply: &str) -> ParsedReply {
        for raw in reply.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match marker(line) {
                Some(("MISSION", rest)) => {
                    self.out.mission_requested = rest.eq_ignore_ascii_case("true");
                }
                Some(("NARRATION", rest)) => {
                    self.close_blocks();
                    self.push(Step::Narration {
                        text: rest.to_string(),
                    });
                }
                Some(("DIALOGUE", rest)) => {
                    self.close_blocks();
                    match split_dialogue(rest) {
                        Some((character_id, text)) => self.push(Step::Dialogue {
                            character_id,
                            text,
                        }),
                        None => self.push(Step::Narration {
                            text: line.to_string(),
                        }),
                    }
                }
                Some(("HINT", rest)) => {
                    self.close_choice();
                    self.push(Step::Hint {
                        text: rest.to_string(),
                        changes: Vec::new(),
                    });
                    self.hint_open = true;
                }
                Some(("CHANGE", rest)) => self.handle_change(line, rest),
                Some(("CHOICE", rest)) => {
                    self.close_blocks();
                    self.choice = Some(ChoiceBuilder {
                        title: rest.to_string(),
                        ..Default::default()
                    });
                }
                Some(("OPTION", rest)) => match self.choice.as_mut() {
                    Some(choice) => choice.options.push(rest.to_string()),
                    None => {
                        self.hint_open = false;
                        self.push(Step::Narration {
                            text: line.to_string(),
                        });
                    }
                },
                Some(("END_CHOICE", _)) => {
                    // Stray END_CHOICE without an open block carries no text;
                    // closing an absent block is a no-op either way.
                    self.close_choice();
                }
                Some((_, _)) => {
                    // Unknown marker: coerce the whole line to narration.
                    self.close_blocks();
                    self.push(Step::Narration {
                        text: line.to_string(),
                    });
                }
                None => self.handle_plain(line),
            }
        }
        self.close_choice();
        self.out
    }

    /// CHANGE lines are only valid while a hint block is absorbing them.
    fn handle_change(&mut self, line: &str, rest: &str) {
        let parsed = if self.hint_open {
            parse_change(rest)
        } else {
            None
        };
        match parsed {
            Some(change) => {
                self.aggregate(&change);
                if let Some(Step::Hint { changes, .. }) = self.out.steps.last_mut() {
                    changes.push(change);
                }
            }
            None => {
                self.close_blocks();
                self.push(Step::Narration {
                    text: line.to_string(),
                });
            }
        }
    }

    fn handle_plain(&mut self, line: &str) {
        if let Some(choice) = self.choice.as_mut() {
            choice.description.push(line.to_string());
            return;
        }
        self.hint_open = false;
        match split_bare_dialogue(line) {
            Some((character_id, text)) => self.push(Step::Dialogue { character_id, text }),
            None => self.push(Step::Narration {
                text: line.to_string(),
            }),
        }
    }

    fn aggregate(&mut self, change: &Change) {
        match change {
            Change::Attribute { actor, name, delta } => {
                if is_player_alias(actor) {
                    self.out.deltas.add_attribute(name, *delta);
                }
            }
            Change::Relationship { npc, delta } => {
                self.out.deltas.add_relationship(npc, *delta);
            }
            Change::Item {
                name,
                action,
                quantity,
            } => self.out.deltas.add_item(ItemChange {
                name: name.clone(),
                action: *action,
                quantity: *quantity,
            }),
        }
    }

    fn push(&mut self, step: Step) {
        self.out.steps.push(step);
    }

    fn close_choice(&mut self) {
        if let Some(choice) = self.choice.take() {
            // A choice with zero options is discarded.
            if !choice.options.is_empty() {
                self.out.options.extend(choice.options.iter().cloned());
                self.out.steps.push(Step::Choice {
                    title: choice.title,
                    description: choice.description.join("\n"),
                    options: choice.options,
                });
            }
        }
    }

    fn close_blocks(&mut self) {
        self.hint_open = false;
        self.close_choice();
    }
}

/// Recognize `[TAG: rest]` and `[TAG]` lines. The tag must be uppercase
/// ASCII (with underscores), which keeps prose in brackets as narration.
fn marker(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (tag, rest) = match inner.find(':') {
        Some(pos) => (&inner[..pos], inner[pos + 1..].trim()),
        None => (inner, ""),
    };
    let tag = tag.trim();
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
        return None;
    }
    Some((tag, rest))
}

/// Split `characterId, "text"` into its parts.
fn split_dialogue(rest: &str) -> Option<(String, String)> {
    let (id, text) = rest.split_once(',')?;
    let id = id.trim();
    if id.is_empty() {
        return None;
    }
    Some((id.to_string(), strip_quotes(text.trim()).to_string()))
}

/// Heuristic for bare `Name: "text"` dialogue lines (full- or half-width
/// colon). Requires quoted speech to avoid false positives on prose.
fn split_bare_dialogue(line: &str) -> Option<(String, String)> {
    let (name, text) = line
        .split_once('：')
        .or_else(|| line.split_once(':'))?;
    let name = name.trim();
    let text = text.trim();
    if name.is_empty() || name.chars().count() > 24 || name.starts_with('[') {
        return None;
    }
    if !is_quoted(text) {
        return None;
    }
    Some((name.to_string(), strip_quotes(text).to_string()))
}

fn is_quoted(text: &str) -> bool {
    (text.starts_with('"') && text.ends_with('"') && text.chars().count() >= 2)
        || (text.starts_with('“') && text.ends_with('”'))
}

fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    if is_quoted(text) {
        let mut chars = text.chars();
        chars.next();
        chars.next_back();
        chars.as_str()
    } else {
        text
    }
}

/// Parse the three CHANGE shapes.
fn parse_change(rest: &str) -> Option<Change> {
    let parts: Vec<&str> = rest.splitn(3, ',').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let (first, second, third) = (parts[0], parts[1], parts[2]);

    if first.eq_ignore_ascii_case("RELATIONSHIP") {
        return Some(Change::Relationship {
            npc: second.to_string(),
            delta: parse_signed(third)?,
        });
    }
    if let Some(action) = ItemAction::parse(second) {
        return Some(Change::Item {
            name: first.to_string(),
            action,
            quantity: third.trim_start_matches('+').parse().ok()?,
        });
    }
    Some(Change::Attribute {
        actor: first.to_string(),
        name: second.to_string(),
        delta: parse_signed(third)?,
    })
}

fn parse_signed(text: &str) -> Option<i64> {
    text.trim().trim_start_matches('+').parse().ok()
}

/// Re-serialize steps with the marker grammar. `parse(render_steps(s))`
/// yields the same steps and deltas for canonical step sequences.
pub fn render_steps(steps: &[Step]) -> String {
    let mut out = String::new();
    for step in steps {
        match step {
            Step::Narration { text } => {
                out.push_str(&format!("[NARRATION: {text}]\n"));
            }
            Step::Dialogue { character_id, text } => {
                out.push_str(&format!("[DIALOGUE: {character_id}, \"{text}\"]\n"));
            }
            Step::Hint { text, changes } => {
                out.push_str(&format!("[HINT: {text}]\n"));
                for change in changes {
                    match change {
                        Change::Attribute { actor, name, delta } => {
                            out.push_str(&format!("[CHANGE: {actor}, {name}, {delta:+}]\n"));
                        }
                        Change::Relationship { npc, delta } => {
                            out.push_str(&format!("[CHANGE: RELATIONSHIP, {npc}, {delta:+}]\n"));
                        }
                        Change::Item {
                            name,
                            action,
                            quantity,
                        } => {
                            out.push_str(&format!(
                                "[CHANGE: {name}, {}, {quantity}]\n",
                                action.verb()
                            ));
                        }
                    }
                }
            }
            Step::Choice {
                title,
                description,
                options,
            } => {
                out.push_str(&format!("[CHOICE: {title}]\n"));
                for line in description.lines() {
                    out.push_str(line);
                    out.push('\n');
                }
                for option in options {
                    out.push_str(&format!("[OPTION: {option}]\n"));
                }
                out.push_str("[END_CHOICE]\n");
            }
        }
    }
    out
}
