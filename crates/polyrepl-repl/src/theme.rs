//! Kernel-specific themes.
//!
//! A theme decides the splash banner, the prompt, and the accent color.
//! Kernels without a registered theme fall back to [`Theme::default`].

use polyrepl_kernel::KernelName;

/// Accent color for a theme. Mapped to terminal colors by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accent {
    Magenta,
    Cyan,
    Blue,
}

/// Presentation settings for one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    /// Display name of the language.
    pub name: &'static str,
    /// Prompt shown before each input line.
    pub prompt: &'static str,
    pub accent: Accent,
}

impl Theme {
    pub const CSHARP: Theme = Theme {
        name: "C#",
        prompt: "C#> ",
        accent: Accent::Magenta,
    };

    pub const FSHARP: Theme = Theme {
        name: "F#",
        prompt: "F#> ",
        accent: Accent::Cyan,
    };

    pub const PWSH: Theme = Theme {
        name: "PowerShell",
        prompt: "PS> ",
        accent: Accent::Blue,
    };

    /// Banner text rendered at startup.
    pub fn splash(&self) -> String {
        format!(
            "polyrepl v{} — {}\nType /help for commands, /quit to exit.",
            env!("CARGO_PKG_VERSION"),
            self.name
        )
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::CSHARP
    }
}

/// Looks up the theme for a kernel.
pub trait ThemeSelector: Send + Sync {
    fn select(&self, kernel: KernelName) -> Option<Theme>;
}

/// The themes shipped with polyrepl. `sql` has none.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinThemes;

impl ThemeSelector for BuiltinThemes {
    fn select(&self, kernel: KernelName) -> Option<Theme> {
        match kernel {
            KernelName::CSharp => Some(Theme::CSHARP),
            KernelName::FSharp => Some(Theme::FSHARP),
            KernelName::Pwsh => Some(Theme::PWSH),
            KernelName::Sql => None,
        }
    }
}

/// The theme for `kernel`, or the default when none is registered.
pub fn theme_for(themes: &dyn ThemeSelector, kernel: KernelName) -> Theme {
    themes.select(kernel).unwrap_or_default()
}
