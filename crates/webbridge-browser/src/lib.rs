//! Webbridge Browser - the page-driving collaborator
//!
//! Everything that touches a real web page lives here:
//! - [`DomProbe`]: DOM-level primitives over one browser page
//! - [`CdpProbe`]/[`CdpProbeFactory`]: a Chromium implementation over CDP
//! - [`CredentialSet`]: caller cookie sets and their pool fingerprint
//! - [`Surface`]: selectors and key sequences for the Claude and Copilot UIs
//! - [`LoginProvider`]: interactive login when no cookies are supplied

mod cdp;
mod credentials;
mod error;
mod login;
mod probe;
mod screenshot;
mod surface;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cdp::{BrowserSettings, CdpProbe, CdpProbeFactory};
pub use credentials::{short_fingerprint, CredentialSet, SHORT_FINGERPRINT_LEN};
pub use error::{BrowserError, BrowserResult};
pub use login::{CommandLogin, LoginProvider};
pub use probe::{
    DomProbe, KeyChord, ProbeFactory, MODIFIER_ALT, MODIFIER_CONTROL, MODIFIER_META,
    MODIFIER_SHIFT,
};
pub use screenshot::save_debug_screenshot;
pub use surface::{
    wait_for_selector, ClaudeChatSurface, CopilotCodeSurface, Surface, SurfaceRegistry,
    SurfaceSettings,
};
