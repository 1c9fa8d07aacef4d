//! Confirmation prompt with CI fallback

use super::context::UiContext;
use crate::error::{CircletError, CircletResult};

/// Ask a yes/no question; non-interactive contexts get `default`
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> CircletResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    // cliclack blocks on stdin
    let message = message.to_string();
    let answer = tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| CircletError::User(format!("Prompt task failed: {}", e)))?;

    answer.map_err(|e| CircletError::User(format!("Prompt failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn auto_yes_skips_prompt() {
        let ctx = UiContext::non_interactive().with_auto_yes(true);
        assert!(confirm(&ctx, "Clear cache?", false).await.unwrap());
    }

    #[tokio::test]
    async fn non_interactive_returns_default() {
        let ctx = UiContext::non_interactive();
        assert!(!confirm(&ctx, "Clear cache?", false).await.unwrap());
        assert!(confirm(&ctx, "Clear cache?", true).await.unwrap());
    }
}
