//! Property tests for sandbox totality and the wrap invariant

use priorart_core::error::PipelineError;
use priorart_core::sandbox::{sanitize, MAX_IDEA_CHARS, WRAP_CLOSE, WRAP_OPEN};
use proptest::prelude::*;

/// Strip the five escape entities; whatever remains must be free of the
/// raw structural characters.
fn without_entities(s: &str) -> String {
    s.replace("&amp;", "")
        .replace("&lt;", "")
        .replace("&gt;", "")
        .replace("&quot;", "")
        .replace("&#x27;", "")
}

proptest! {
    /// Sandbox totality: every short input either escapes cleanly or is
    /// rejected as injection. No third outcome, no panic.
    #[test]
    fn sanitize_is_total_for_short_inputs(input in ".{0,400}") {
        match sanitize(&input) {
            Ok(idea) => {
                let residual = without_entities(idea.text());
                prop_assert!(!residual.contains('<'));
                prop_assert!(!residual.contains('>'));
                prop_assert!(!residual.contains('&'));
                prop_assert!(!residual.contains('"'));
                prop_assert!(!residual.contains('\''));
            }
            Err(PipelineError::PromptInjection) => {}
            Err(other) => prop_assert!(false, "unexpected outcome: {:?}", other),
        }
    }

    /// Wrap invariant: exactly one balanced delimiter pair, with every
    /// user-supplied character inside it.
    #[test]
    fn wrap_produces_one_balanced_region(input in "[a-zA-Z가-힣0-9 .,]{1,200}") {
        if let Ok(idea) = sanitize(&input) {
            let wrapped = idea.wrap();
            prop_assert_eq!(wrapped.matches(WRAP_OPEN).count(), 1);
            prop_assert_eq!(wrapped.matches(WRAP_CLOSE).count(), 1);
            prop_assert!(wrapped.starts_with(WRAP_OPEN));
            prop_assert!(wrapped.ends_with(WRAP_CLOSE));

            let inner = &wrapped[WRAP_OPEN.len()..wrapped.len() - WRAP_CLOSE.len()];
            prop_assert_eq!(inner, idea.text());
        }
    }

    /// Length cap: anything beyond the limit is InputTooLong regardless
    /// of content.
    #[test]
    fn oversize_inputs_rejected(extra in 1usize..200, filler in "[a-z가-힣]") {
        let ch = filler.chars().next().unwrap_or('a');
        let input: String = std::iter::repeat(ch).take(MAX_IDEA_CHARS + extra).collect();
        let rejected = matches!(sanitize(&input), Err(PipelineError::InputTooLong { .. }));
        prop_assert!(rejected);
    }
}
