//! Output mode detection

use std::io::IsTerminal;

/// Environment variables set by common CI providers
const CI_VARS: [&str; 9] = [
    "CI",
    "CIRCLECI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// Decides between fancy and plain output
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    auto_yes: bool,
}

impl UiContext {
    /// Interactive when both stdin and stdout are terminals outside CI
    pub fn detect() -> Self {
        let terminal = std::io::stdout().is_terminal() && std::io::stdin().is_terminal();
        Self {
            interactive: terminal && !Self::in_ci(),
            auto_yes: false,
        }
    }

    /// Plain output, prompts answered with their default
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    /// Answer every prompt with yes
    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }

    /// Whether to use cliclack log lines
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }

    /// Whether any CI provider variable is set
    pub fn in_ci() -> bool {
        CI_VARS.iter().any(|var| std::env::var_os(var).is_some())
    }
}
