//! Device classification
//!
//! Decides once, at player construction, whether the runtime looks like a
//! mobile device. Mobile profiles skip the primary audio graph entirely.

use std::sync::LazyLock;

use regex::Regex;

/// Viewport widths below this count as mobile
pub const MOBILE_VIEWPORT_WIDTH: u32 = 768;

static MOBILE_AGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)iPhone|iPad|iPod|Android").expect("valid regex")
});

static IOS_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"iPad|iPhone|iPod").expect("valid regex"));

static ANDROID_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Android").expect("valid regex"));

/// Signals the classification is computed from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    /// User-agent style platform string
    pub user_agent: Option<String>,
    /// Width of the display surface in logical pixels
    pub viewport_width: Option<u32>,
}

impl RuntimeEnvironment {
    /// Environment for the platform this binary was compiled for
    #[must_use]
    pub fn native() -> Self {
        let user_agent = match std::env::consts::OS {
            "ios" => Some("iPhone".to_string()),
            "android" => Some("Android".to_string()),
            os => Some(format!("{os} ({})", std::env::consts::ARCH)),
        };

        Self {
            user_agent,
            viewport_width: None,
        }
    }

    /// Replace the user agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Replace the viewport width
    #[must_use]
    pub const fn with_viewport_width(mut self, width: u32) -> Self {
        self.viewport_width = Some(width);
        self
    }

    fn agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or_default()
    }

    /// Phone or tablet by user agent, or a narrow viewport
    #[must_use]
    pub fn is_mobile(&self) -> bool {
        MOBILE_AGENT.is_match(self.agent())
            || self
                .viewport_width
                .is_some_and(|width| width < MOBILE_VIEWPORT_WIDTH)
    }

    /// Apple handheld
    #[must_use]
    pub fn is_ios(&self) -> bool {
        IOS_AGENT.is_match(self.agent())
    }

    /// Android device
    #[must_use]
    pub fn is_android(&self) -> bool {
        ANDROID_AGENT.is_match(self.agent())
    }

    /// Freeze the current classification
    #[must_use]
    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            is_mobile: self.is_mobile(),
            is_ios: self.is_ios(),
            is_android: self.is_android(),
        }
    }
}

/// Immutable device classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DeviceProfile {
    /// Phone, tablet or narrow viewport
    pub is_mobile: bool,
    /// Apple handheld
    pub is_ios: bool,
    /// Android device
    pub is_android: bool,
}

impl DeviceProfile {
    /// Profile of a desktop machine
    #[must_use]
    pub const fn desktop() -> Self {
        Self {
            is_mobile: false,
            is_ios: false,
            is_android: false,
        }
    }

    /// Classify the native platform
    #[must_use]
    pub fn detect() -> Self {
        RuntimeEnvironment::native().profile()
    }
}
