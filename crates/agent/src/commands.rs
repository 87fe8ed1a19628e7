//! Command parsing for inbound text and button callbacks.

use chatterbox_core::chat::StatsPeriod;
use chatterbox_core::message::UserId;

/// Message counts offered by the analysis menu.
pub const ANALYZE_COUNTS: [usize; 3] = [25, 50, 100];

/// A parsed `!` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Set the system prompt, or show it when `None`
    System(Option<String>),
    ClearSystem,
    /// Set the temperature, or show it when `None`. Validated by the handler.
    Temp(Option<String>),
    Models,
    /// Select a model, or show the current one when `None`
    Model(Option<String>),
    Forget,
    Analyze,
    Stats,
    Img(Option<String>),
    Here,
    HideMe,
    Say(String),
    /// Anything else: a question for the model
    Prompt(String),
}

impl Command {
    /// Parse a message starting with `!`. Returns `None` for other text and
    /// for a bare `!`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let body = text.strip_prefix('!')?;

        let (word, rest) = match body.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (body, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let command = match word.to_lowercase().as_str() {
            "help" => Self::Help,
            "system" => Self::System(arg),
            "clearsystem" => Self::ClearSystem,
            "temp" => Self::Temp(arg),
            "models" => Self::Models,
            "model" => Self::Model(arg),
            "forget" => Self::Forget,
            "analyze" => Self::Analyze,
            "stats" => Self::Stats,
            "img" => Self::Img(arg),
            "here" => Self::Here,
            "hideme" => Self::HideMe,
            "say" => Self::Say(rest.to_string()),
            _ => {
                let prompt = body.trim();
                if prompt.is_empty() {
                    return None;
                }
                Self::Prompt(prompt.to_string())
            }
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::System(_) => "system",
            Self::ClearSystem => "clearsystem",
            Self::Temp(_) => "temp",
            Self::Models => "models",
            Self::Model(_) => "model",
            Self::Forget => "forget",
            Self::Analyze => "analyze",
            Self::Stats => "stats",
            Self::Img(_) => "img",
            Self::Here => "here",
            Self::HideMe => "hideme",
            Self::Say(_) => "say",
            Self::Prompt(_) => "prompt",
        }
    }
}

/// Whether `text` mentions the bot by `@username`.
pub fn mentions(text: &str, username: &str) -> bool {
    let needle = format!("@{}", username.to_lowercase());
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?' | ':'))
        .any(|word| word == needle)
}

/// Whose statistics a `!stats` menu is browsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsScope {
    Group,
    Members,
}

impl StatsScope {
    fn code(&self) -> &'static str {
        match self {
            Self::Group => "grp",
            Self::Members => "usr",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "grp" => Some(Self::Group),
            "usr" => Some(Self::Members),
            _ => None,
        }
    }
}

/// A decoded inline-keyboard callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// An author was picked in the analysis menu
    AnalyzeSelect { user_id: UserId },
    /// Run the analysis over the author's last `count` texts
    AnalyzeRun { user_id: UserId, count: usize },
    /// Show one page of an image-search session
    ImagePage { session_id: String, index: i64 },
    /// Back to the statistics scope choice
    StatsMenu,
    /// Choose the period for a scope
    StatsPeriods { scope: StatsScope },
    /// Whole-chat totals for a period
    StatsGroup { period: StatsPeriod },
    /// Most active members for a period
    StatsMembers { period: StatsPeriod },
    /// One member's breakdown by message kind
    StatsMember { user_id: UserId, period: StatsPeriod },
    /// A button that only displays something
    Noop,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split(':').collect();
        match parts.as_slice() {
            ["anlz", "sel", uid] => Some(Self::AnalyzeSelect {
                user_id: uid.parse().ok()?,
            }),
            ["anlz", "run", uid, count] => {
                let count: usize = count.parse().ok()?;
                if !ANALYZE_COUNTS.contains(&count) {
                    return None;
                }
                Some(Self::AnalyzeRun {
                    user_id: uid.parse().ok()?,
                    count,
                })
            }
            ["img", session, index] if !session.is_empty() => Some(Self::ImagePage {
                session_id: session.to_string(),
                index: index.parse().ok()?,
            }),
            ["stats", "menu"] => Some(Self::StatsMenu),
            ["stats", scope] => Some(Self::StatsPeriods {
                scope: StatsScope::from_code(scope)?,
            }),
            ["stats", "u", uid, period] => Some(Self::StatsMember {
                user_id: uid.parse().ok()?,
                period: StatsPeriod::from_code(period)?,
            }),
            ["stats", scope, period] => {
                let period = StatsPeriod::from_code(period)?;
                Some(match StatsScope::from_code(scope)? {
                    StatsScope::Group => Self::StatsGroup { period },
                    StatsScope::Members => Self::StatsMembers { period },
                })
            }
            ["noop"] => Some(Self::Noop),
            _ => None,
        }
    }

    /// Callback data for this action. Fits Telegram's 64-byte limit.
    pub fn encode(&self) -> String {
        match self {
            Self::AnalyzeSelect { user_id } => format!("anlz:sel:{user_id}"),
            Self::AnalyzeRun { user_id, count } => format!("anlz:run:{user_id}:{count}"),
            Self::ImagePage { session_id, index } => format!("img:{session_id}:{index}"),
            Self::StatsMenu => "stats:menu".to_string(),
            Self::StatsPeriods { scope } => format!("stats:{}", scope.code()),
            Self::StatsGroup { period } => format!("stats:grp:{}", period.code()),
            Self::StatsMembers { period } => format!("stats:usr:{}", period.code()),
            Self::StatsMember { user_id, period } => {
                format!("stats:u:{user_id}:{}", period.code())
            }
            Self::Noop => "noop".to_string(),
        }
    }
}
