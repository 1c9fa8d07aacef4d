//! Terminal output
//!
//! Uses `cliclack` log lines on an interactive terminal and plain
//! `[OK]`/`[FAIL]` prefixed lines in CI, chosen by [`UiContext`].
//!
//! # Example
//!
//! ```rust,ignore
//! use circlet::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! ui::intro(&ctx, "circlet run ci");
//! ui::job_line(&ctx, "build", "Compiling muta v0.1.0");
//! ui::step_ok_detail(&ctx, "build", "42.0s");
//! ui::step_blocked(&ctx, "test", "build");
//! ui::outro_error(&ctx, "1 job failed");
//! ```

mod context;
mod output;
mod prompts;

pub use context::UiContext;
pub use output::{
    intro, job_line, key_value, outro_error, outro_success, remark, section, step_blocked,
    step_error_detail, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint,
};
pub use prompts::confirm;
