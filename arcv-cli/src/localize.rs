use anyhow::{anyhow, Result};
use fluent_bundle::{FluentArgs, FluentBundle, FluentResource, FluentValue};
use unic_langid::LanguageIdentifier;

use arcv_core::DisplayState;

/// Fluent-based localizer with built-in resources.
pub struct FluentLoc {
    bundle: FluentBundle<FluentResource>,
}

impl FluentLoc {
    /// Create a localizer over the built-in en-GB strings (see ../i18n).
    /// `lang` only tags the bundle; unparseable tags fall back to en-GB.
    pub fn builtin(lang: &str) -> Result<Self> {
        let langid: LanguageIdentifier = match lang.parse() {
            Ok(id) => id,
            Err(_) => "en-GB".parse().map_err(|e| anyhow!("bad fallback language: {e:?}"))?,
        };
        let res = FluentResource::try_new(include_str!("../i18n/en-GB.ftl").to_owned())
            .map_err(|(_, errs)| anyhow!("invalid FTL resource: {errs:?}"))?;
        let mut bundle = FluentBundle::new(vec![langid]);
        // Plain terminal output; no bidi isolation marks around arguments.
        bundle.set_use_isolating(false);
        bundle
            .add_resource(res)
            .map_err(|errs| anyhow!("failed to add FTL resource: {errs:?}"))?;
        Ok(Self { bundle })
    }

    /// Format a message by code with named args (("name","value"), ...).
    /// Returns the code itself if not found.
    pub fn msg(&self, code: &str, args: &[(&str, &str)]) -> String {
        let Some(msg) = self.bundle.get_message(code) else {
            return code.to_string();
        };
        let Some(pattern) = msg.value() else {
            return code.to_string();
        };

        let mut fa = FluentArgs::new();
        for (k, v) in args {
            fa.set(*k, FluentValue::from(*v));
        }

        let mut errs = vec![];
        let s = self.bundle.format_pattern(pattern, Some(&fa), &mut errs).to_string();
        if errs.is_empty() {
            s
        } else {
            code.to_string()
        }
    }

    pub fn state(&self, state: DisplayState) -> String {
        let code = match state {
            DisplayState::Verified => "state-verified",
            DisplayState::Unverified => "state-unverified",
            DisplayState::Failed => "state-failed",
        };
        self.msg(code, &[])
    }
}
