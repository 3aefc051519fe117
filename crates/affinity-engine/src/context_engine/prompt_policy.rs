//! Intimacy-level prompt policy.
//!
//! A [`PromptPolicy`] is the structured set of behaviour rules the character follows at a
//! given relationship level. It stays structured through the engine and is only rendered
//! to instruction text when the system message is assembled.

use crate::intimacy::IntimacyLevel;
use serde::Serialize;

/// User turn sent when the character opens the conversation itself. Never persisted.
pub const PROACTIVE_GREETING_CUE: &str = "[proactive-greeting]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStyle {
    Formal,
    Courteous,
    Warm,
    Friendly,
    Familiar,
    Endearing,
    Intimate,
}

/// How freely the character asks questions and extends the topic on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Proactivity {
    Forbidden,
    Optional,
    Moderate,
    Expected,
    Frequent,
}

/// Bracketed action/emotion markup such as `*smiles*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupUsage {
    Forbidden,
    Sparing,
    Moderate,
    Frequent,
    Encouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Terse,
    Concise,
    Moderate,
    Detailed,
    Expansive,
}

/// Extra directive for the first reply of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningDirective {
    BriefNeutral,
    WarmGreeting,
    AskAboutLife,
}

/// How to react to [`PROACTIVE_GREETING_CUE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GreetingCueHandling {
    Neutral,
    InCharacter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptPolicy {
    pub level: IntimacyLevel,
    pub address: AddressStyle,
    pub proactivity: Proactivity,
    pub markup: MarkupUsage,
    pub verbosity: Verbosity,
    pub opening: Option<OpeningDirective>,
    pub greeting_cue: GreetingCueHandling,
}

/// Policy for a level. Total over every level.
pub fn policy(level: IntimacyLevel, is_first_message: bool) -> PromptPolicy {
    use IntimacyLevel::*;

    let (address, proactivity, markup, verbosity) = match level {
        Stranger => (AddressStyle::Formal, Proactivity::Forbidden, MarkupUsage::Forbidden, Verbosity::Terse),
        FirstAcquaintance => (AddressStyle::Courteous, Proactivity::Forbidden, MarkupUsage::Forbidden, Verbosity::Concise),
        WarmingUp => (AddressStyle::Warm, Proactivity::Optional, MarkupUsage::Sparing, Verbosity::Moderate),
        FastFriends => (AddressStyle::Friendly, Proactivity::Moderate, MarkupUsage::Moderate, Verbosity::Detailed),
        CloseFriends => (AddressStyle::Familiar, Proactivity::Expected, MarkupUsage::Frequent, Verbosity::Detailed),
        KindredSpirit => (AddressStyle::Endearing, Proactivity::Frequent, MarkupUsage::Encouraged, Verbosity::Expansive),
        Soulmate => (AddressStyle::Intimate, Proactivity::Frequent, MarkupUsage::Encouraged, Verbosity::Expansive),
    };

    let opening = is_first_message.then(|| {
        if level >= KindredSpirit {
            OpeningDirective::AskAboutLife
        } else if level >= FastFriends {
            OpeningDirective::WarmGreeting
        } else {
            OpeningDirective::BriefNeutral
        }
    });

    let greeting_cue = if level >= FastFriends {
        GreetingCueHandling::InCharacter
    } else {
        GreetingCueHandling::Neutral
    };

    PromptPolicy {
        level,
        address,
        proactivity,
        markup,
        verbosity,
        opening,
        greeting_cue,
    }
}

impl AddressStyle {
    fn instruction(&self) -> &'static str {
        match self {
            AddressStyle::Formal => "Keep a polite, formal and somewhat distant tone. Use neutral, objective wording.",
            AddressStyle::Courteous => "Be polite and friendly but still fairly formal. Avoid emotional language.",
            AddressStyle::Warm => "Use a warmer, more personable tone than with a stranger.",
            AddressStyle::Friendly => "Address the user in a friendly way and show genuine interest in them.",
            AddressStyle::Familiar => "Address the user familiarly, as a close friend would (for example \"my friend\").",
            AddressStyle::Endearing => "Use affectionate forms of address (for example \"dear friend\") and let real warmth show.",
            AddressStyle::Intimate => "Use the most intimate and tender forms of address; speak as someone who knows the user deeply.",
        }
    }
}

impl Proactivity {
    fn instruction(&self) -> &'static str {
        match self {
            Proactivity::Forbidden => "Only answer what is asked. Do not ask questions back and do not extend the topic.",
            Proactivity::Optional => "You may occasionally ask about the user's situation or thoughts, but not often.",
            Proactivity::Moderate => "Now and then ask about the user's life and ideas, without overdoing it.",
            Proactivity::Expected => "After answering, always follow up with a caring question or some small talk about their day.",
            Proactivity::Frequent => "Frequently take the initiative: ask about the user's life, feelings and needs, and deepen the topic.",
        }
    }
}

impl MarkupUsage {
    fn instruction(&self) -> &'static str {
        match self {
            MarkupUsage::Forbidden => "Never use bracketed action or emotion markup such as *smiles*; reply in plain text only.",
            MarkupUsage::Sparing => "You may occasionally use simple action markup such as *smiles* or *nods*, sparingly.",
            MarkupUsage::Moderate => "Use action and emotion markup such as *thinks for a moment* in moderation.",
            MarkupUsage::Frequent => "Often use action and emotion markup such as *smiles warmly* or *speaks softly* to make the exchange vivid.",
            MarkupUsage::Encouraged => "Use rich action and emotion markup such as *looks at you fondly* freely to make the conversation immersive.",
        }
    }
}

impl Verbosity {
    fn instruction(&self) -> &'static str {
        match self {
            Verbosity::Terse => "Keep answers short and to the point.",
            Verbosity::Concise => "Keep answers concise and impersonal.",
            Verbosity::Moderate => "Answers can be a little more enthusiastic and detailed.",
            Verbosity::Detailed => "Give detailed, personal answers.",
            Verbosity::Expansive => "Give rich, in-depth answers with background, personal insight and feeling.",
        }
    }
}

impl OpeningDirective {
    fn instruction(&self) -> &'static str {
        match self {
            OpeningDirective::BriefNeutral => "This is the start of the conversation: open with a brief, neutral greeting.",
            OpeningDirective::WarmGreeting => "This is the start of the conversation: greet the user warmly and ask how they have been.",
            OpeningDirective::AskAboutLife => {
                "This is the start of the conversation: greet the user, ask about their recent life and suggest a few topics they might enjoy."
            }
        }
    }
}

impl GreetingCueHandling {
    fn instruction(&self) -> String {
        match self {
            GreetingCueHandling::Neutral => format!(
                "If the user's message is exactly {}, reply with a brief, polite greeting.",
                PROACTIVE_GREETING_CUE
            ),
            GreetingCueHandling::InCharacter => format!(
                "If the user's message is exactly {}, ignore it and greet the user in character on your own initiative, asking how they have been.",
                PROACTIVE_GREETING_CUE
            ),
        }
    }
}

impl PromptPolicy {
    /// Instruction text for the system message.
    pub fn render(&self) -> String {
        let mut rules: Vec<String> = vec![
            self.address.instruction().to_string(),
            self.verbosity.instruction().to_string(),
            self.proactivity.instruction().to_string(),
            self.markup.instruction().to_string(),
        ];
        if let Some(opening) = self.opening {
            rules.push(opening.instruction().to_string());
        }
        rules.push(self.greeting_cue.instruction());

        let mut text = format!("[Relationship level: {}]\nYour response style:", self.level);
        for (i, rule) in rules.iter().enumerate() {
            text.push_str(&format!("\n{}. {}", i + 1, rule));
        }
        text
    }
}
