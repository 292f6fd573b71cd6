//! Tokenizer turning raw source text into an ordered sequence of playback
//! tokens.
//!
//! This is a pure function of its input: no I/O, no state, and calling
//! [`tokenize`] twice on identical input yields identical sequences. The
//! directive syntax is `<<...>>`; everything else is literal text that the
//! playback engine later injects character by character.
//!
//! Directive parsing tries a fixed priority order in which the first match
//! wins. The order is load-bearing: `<<pause=5>>` must parse as a timed
//! pause before the generic chord rule could claim a key named `pause=5`,
//! and the bare `<<pause>>` form must lose to the timed form.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// One atomic unit of simulated input derived from source text.
///
/// Tokens are immutable once produced. The playback engine consumes a
/// working copy; the original sequence is retained untouched so `stop` can
/// restore it.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A literal text span, injected one character at a time.
    Text(String),
    /// One named special key (canonical name, e.g. `enter`, `esc`), or the
    /// synthetic `atpause` marker that unconditionally forces a pause.
    SingleKey(String),
    /// A chord: keys pressed and released in the same order.
    MultiKeys(Vec<String>),
    /// A delay in seconds with no injection.
    TimedPause(f64),
    /// Discrete mouse scroll ticks; `direction` is `1` (up) or `-1` (down).
    MouseScroll {
        /// Number of discrete ticks to emit.
        count: u32,
        /// Scroll direction, `1` for up and `-1` for down.
        direction: i8,
    },
    /// One named key pressed and released `count` times sequentially.
    RepeatedKey {
        /// Canonical key name.
        key: String,
        /// Number of press/release cycles.
        count: u32,
    },
}

impl Token {
    /// The synthetic marker key produced by a bare `<<pause>>` directive.
    pub const ATPAUSE: &'static str = "atpause";

    /// True for the `atpause` marker token.
    pub fn is_atpause(&self) -> bool {
        matches!(self, Self::SingleKey(k) if k == Self::ATPAUSE)
    }

    /// True for an `enter`-mapped single key.
    pub fn is_enter(&self) -> bool {
        matches!(self, Self::SingleKey(k) if k == "enter")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::SingleKey(k) if k == "space" => f.write_str(" "),
            Self::SingleKey(k) => write!(f, "{}", k.to_uppercase()),
            Self::MultiKeys(keys) => {
                let joined = keys
                    .iter()
                    .map(|k| k.to_uppercase())
                    .collect::<Vec<_>>()
                    .join("+");
                f.write_str(&joined)
            }
            Self::TimedPause(secs) => write!(f, "PAUSE:{}", secs),
            Self::MouseScroll { count, direction } => {
                write!(f, "SCROLL:C{}|D{}", count, direction)
            }
            Self::RepeatedKey { key, count } => {
                if *count == 1 {
                    write!(f, "{}", key.to_uppercase())
                } else {
                    write!(f, "{}x{}", key.to_uppercase(), count)
                }
            }
        }
    }
}

/// Render the bracketed preview line for a token, as returned by the
/// engine's `data` command.
pub fn preview_line(token: &Token) -> String {
    format!("[ {} ]", token)
}

static DIRECTIVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<<.*?>>").unwrap());
static PAUSE_TIMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^<<pause=(\d+(?:\.\d+)?)>>$").unwrap());
static PAUSE_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^<<pause>>$").unwrap());
static SCROLL_UP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^<<scrollup(?:=(\d+))?>>$").unwrap());
static SCROLL_DOWN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^<<scrolldown(?:=(\d+))?>>$").unwrap());
static ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^<<esc(?:ape)?>>$").unwrap());
static ENTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^<<enter>>$").unwrap());
static GENERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<<([^<>]+)>>$").unwrap());

/// Counted-key directives tried in priority order after the pause and
/// scroll rules. Each maps to a [`Token::RepeatedKey`] with the canonical
/// key name; the `=N` suffix defaults to 1 when omitted.
static COUNTED_KEYS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let counted = |name: &str| {
        Regex::new(&format!(r"(?i)^<<{}(?:=(\d+))?>>$", name)).unwrap()
    };
    vec![
        (counted("backspace"), "backspace"),
        (counted("delete"), "delete"),
        (counted("up_arrow"), "up"),
        (counted("down_arrow"), "down"),
        (counted("left_arrow"), "left"),
        (counted("right_arrow"), "right"),
        (counted("home"), "home"),
        (counted("end"), "end"),
        (counted("tab"), "tab"),
    ]
});

/// Map a directive key name to its canonical injection name. Unmapped names
/// pass through lower-cased.
fn canonical_key(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "control" => "ctrl".into(),
        "win" | "super" => "cmd".into(),
        "escape" => "esc".into(),
        "return" => "enter".into(),
        "del" => "delete".into(),
        "pageup" => "page_up".into(),
        "pagedown" => "page_down".into(),
        _ => lower,
    }
}

/// Parse a single `<<...>>` span into a command token, if it matches any
/// directive rule. Priority order is fixed; first match wins.
fn parse_directive(span: &str) -> Option<Token> {
    if let Some(caps) = PAUSE_TIMED.captures(span) {
        let secs: f64 = caps[1].parse().ok()?;
        return Some(Token::TimedPause(secs));
    }
    if PAUSE_BARE.is_match(span) {
        return Some(Token::SingleKey(Token::ATPAUSE.into()));
    }
    if let Some(caps) = SCROLL_UP.captures(span) {
        let count = caps.get(1).map_or(1, |m| m.as_str().parse().unwrap_or(1));
        return Some(Token::MouseScroll {
            count,
            direction: 1,
        });
    }
    if let Some(caps) = SCROLL_DOWN.captures(span) {
        let count = caps.get(1).map_or(1, |m| m.as_str().parse().unwrap_or(1));
        return Some(Token::MouseScroll {
            count,
            direction: -1,
        });
    }
    for (re, key) in COUNTED_KEYS.iter() {
        if let Some(caps) = re.captures(span) {
            let count = caps.get(1).map_or(1, |m| m.as_str().parse().unwrap_or(1));
            return Some(Token::RepeatedKey {
                key: (*key).into(),
                count,
            });
        }
    }
    if ESCAPE.is_match(span) {
        return Some(Token::SingleKey("esc".into()));
    }
    if ENTER.is_match(span) {
        return Some(Token::SingleKey("enter".into()));
    }
    if let Some(caps) = GENERIC.captures(span) {
        let keys: Vec<String> = caps[1].split('+').map(canonical_key).collect();
        if keys.len() == 1 {
            return Some(Token::SingleKey(keys.into_iter().next()?));
        }
        return Some(Token::MultiKeys(keys));
    }
    None
}

/// Split prepared text into directive spans and the literal spans between
/// them, preserving order and dropping empties.
fn split_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut last = 0;
    for m in DIRECTIVE.find_iter(text) {
        if m.start() > last {
            spans.push(&text[last..m.start()]);
        }
        spans.push(m.as_str());
        last = m.end();
    }
    if last < text.len() {
        spans.push(&text[last..]);
    }
    spans
}

/// Tokenize raw source text into an ordered command token sequence.
///
/// `fold_quad_spaces` replaces literal four-space runs with a tab before
/// any other processing. Plain spaces and newlines become `space`/`enter`
/// key tokens via internal escape markers, so typed whitespace goes through
/// the same key path as explicit `<<space>>`/`<<enter>>` directives.
pub fn tokenize(text: &str, fold_quad_spaces: bool) -> Vec<Token> {
    let mut prepared = if fold_quad_spaces {
        text.replace("    ", "\t")
    } else {
        text.to_string()
    };
    prepared = prepared
        .replace(' ', "<<space>>")
        .replace('\n', "<<enter>>");

    split_spans(&prepared)
        .into_iter()
        .map(|span| parse_directive(span).unwrap_or_else(|| Token::Text(span.to_string())))
        .collect()
}
