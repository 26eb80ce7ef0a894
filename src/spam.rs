use crate::platform::Member;

/// The two name fields the heuristic looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    pub username: String,
    /// First and last name glued together without a separator.
    pub display_name: String,
}

impl MemberIdentity {
    pub fn new(username: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
        }
    }
}

impl From<&Member> for MemberIdentity {
    fn from(member: &Member) -> Self {
        Self {
            username: member.username.clone(),
            display_name: format!("{}{}", member.first_name, member.last_name),
        }
    }
}

/// Outcome of classifying one member, keeping the rule that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    IllegalSubstring,
    TooLong,
}

impl Verdict {
    pub fn is_spam(self) -> bool {
        !matches!(self, Verdict::Clean)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Clean => write!(f, "clean"),
            Verdict::IllegalSubstring => write!(f, "illegal substring in name"),
            Verdict::TooLong => write!(f, "name too long"),
        }
    }
}

/// Thresholds the classifier runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpamPolicy {
    /// Longest allowed username / display name, in characters.
    /// Negative values flag every member.
    pub max_length: i64,
    /// Substring that marks a display name as spam. Empty disables the check.
    pub illegal_substring: String,
}

impl Default for SpamPolicy {
    fn default() -> Self {
        Self {
            max_length: 20,
            illegal_substring: String::new(),
        }
    }
}

impl SpamPolicy {
    /// Rules are applied in order and the first match wins: illegal
    /// substring in the display name, then length of either field.
    pub fn classify(&self, identity: &MemberIdentity) -> Verdict {
        if !self.illegal_substring.is_empty()
            && identity.display_name.contains(&self.illegal_substring)
        {
            return Verdict::IllegalSubstring;
        }
        if exceeds(&identity.username, self.max_length)
            || exceeds(&identity.display_name, self.max_length)
        {
            return Verdict::TooLong;
        }
        Verdict::Clean
    }
}

/// Free-function form of [`SpamPolicy::classify`].
#[allow(dead_code)]
pub fn is_spam(
    username: &str,
    display_name: &str,
    max_length: i64,
    illegal_substring: &str,
) -> bool {
    let policy = SpamPolicy {
        max_length,
        illegal_substring: illegal_substring.to_string(),
    };
    policy
        .classify(&MemberIdentity::new(username, display_name))
        .is_spam()
}

fn exceeds(value: &str, max_length: i64) -> bool {
    // Counted in chars; Telegram limits names in characters, not bytes.
    let len = i64::try_from(value.chars().count()).unwrap_or(i64::MAX);
    len > max_length
}
