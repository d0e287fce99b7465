use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::CredentialSet;
use crate::error::{BrowserError, BrowserResult};

/// One browser page, driven through DOM-level primitives.
///
/// Implementations must be safe to share between the task that submits a
/// prompt and the task that polls for the answer; the session lock keeps
/// those from overlapping across requests.
#[async_trait]
pub trait DomProbe: Send + Sync {
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// Install cookies for `domain` before the first navigation.
    async fn load_cookies(&self, credentials: &CredentialSet, domain: &str) -> BrowserResult<()>;

    /// Run a script in the page and return its JSON value
    /// (`Null` for `undefined`).
    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value>;

    async fn locator_count(&self, selector: &str) -> BrowserResult<usize>;

    async fn click(&self, selector: &str) -> BrowserResult<()>;

    /// Focus the element matched by `selector` and type `text` into it.
    async fn type_text(&self, selector: &str, text: &str) -> BrowserResult<()>;

    /// Press a key chord such as `Enter` or `Control+Enter`.
    async fn press_key(&self, chord: &str) -> BrowserResult<()>;

    /// Full-page PNG.
    async fn screenshot(&self) -> BrowserResult<Vec<u8>>;

    async fn close(&self) -> BrowserResult<()>;
}

/// Opens fresh probes for new sessions.
#[async_trait]
pub trait ProbeFactory: Send + Sync {
    /// `profile` names the per-identity browser profile so repeated sessions
    /// for the same caller reuse on-disk state.
    async fn open(&self, profile: &str) -> BrowserResult<Arc<dyn DomProbe>>;
}

/// CDP modifier bits.
pub const MODIFIER_ALT: i64 = 1;
pub const MODIFIER_CONTROL: i64 = 2;
pub const MODIFIER_META: i64 = 4;
pub const MODIFIER_SHIFT: i64 = 8;

/// A parsed key chord, e.g. `Control+Shift+a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: i64,
    pub key: String,
    pub code: String,
    pub virtual_key: Option<i64>,
    /// Text the key inserts, when it inserts any.
    pub text: Option<String>,
}

impl KeyChord {
    pub fn parse(chord: &str) -> BrowserResult<Self> {
        let mut parts: Vec<&str> = chord.split('+').map(str::trim).collect();
        let key = parts
            .pop()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BrowserError::Input(format!("empty key chord: {:?}", chord)))?;

        let mut modifiers = 0;
        for modifier in parts {
            modifiers |= match modifier.to_ascii_lowercase().as_str() {
                "alt" | "option" => MODIFIER_ALT,
                "control" | "ctrl" => MODIFIER_CONTROL,
                "meta" | "cmd" | "command" => MODIFIER_META,
                "shift" => MODIFIER_SHIFT,
                other => {
                    return Err(BrowserError::Input(format!("unknown modifier: {}", other)));
                }
            };
        }

        let (code, virtual_key, text) = match key {
            "Enter" => ("Enter".to_string(), Some(13), Some("\r".to_string())),
            "Tab" => ("Tab".to_string(), Some(9), None),
            "Escape" => ("Escape".to_string(), Some(27), None),
            "Backspace" => ("Backspace".to_string(), Some(8), None),
            "Delete" => ("Delete".to_string(), Some(46), None),
            "ArrowUp" => ("ArrowUp".to_string(), Some(38), None),
            "ArrowDown" => ("ArrowDown".to_string(), Some(40), None),
            "ArrowLeft" => ("ArrowLeft".to_string(), Some(37), None),
            "ArrowRight" => ("ArrowRight".to_string(), Some(39), None),
            single if single.chars().count() == 1 => {
                let c = single.chars().next().unwrap_or(' ');
                if c.is_ascii_alphabetic() {
                    let upper = c.to_ascii_uppercase();
                    (format!("Key{}", upper), Some(upper as i64), Some(single.to_string()))
                } else if c.is_ascii_digit() {
                    (format!("Digit{}", c), Some(c as i64), Some(single.to_string()))
                } else {
                    (String::new(), None, Some(single.to_string()))
                }
            }
            other => return Err(BrowserError::Input(format!("unsupported key: {}", other))),
        };

        // Control/Meta chords are shortcuts, not text input.
        let text = text.filter(|_| modifiers & (MODIFIER_CONTROL | MODIFIER_META) == 0);

        Ok(Self {
            modifiers,
            key: key.to_string(),
            code,
            virtual_key,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_enter() {
        let chord = KeyChord::parse("Enter").unwrap();
        assert_eq!(chord.modifiers, 0);
        assert_eq!(chord.virtual_key, Some(13));
        assert_eq!(chord.text.as_deref(), Some("\r"));
    }

    #[test]
    fn test_parse_control_enter_suppresses_text() {
        let chord = KeyChord::parse("Control+Enter").unwrap();
        assert_eq!(chord.modifiers, MODIFIER_CONTROL);
        assert_eq!(chord.key, "Enter");
        assert!(chord.text.is_none());
    }

    #[test]
    fn test_parse_select_all() {
        let chord = KeyChord::parse("Ctrl+Shift+a").unwrap();
        assert_eq!(chord.modifiers, MODIFIER_CONTROL | MODIFIER_SHIFT);
        assert_eq!(chord.code, "KeyA");
        assert_eq!(chord.virtual_key, Some('A' as i64));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(KeyChord::parse("Hyper+a").is_err());
        assert!(KeyChord::parse("Control+").is_err());
        assert!(KeyChord::parse("PrintScreen").is_err());
    }
}
