//! Property-based tests for the state machine core
//!
//! These tests verify key invariants hold across all possible inputs.

use super::extract::apply_response;
use super::template::fill;
use super::*;
use crate::llm::LlmResponse;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_state_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("general_inquiries".to_string()),
        Just("appointment".to_string()),
        Just("appointment_confirm".to_string()),
        Just("information_inquiry".to_string()),
        "[a-z]{3,8}",
    ]
}

fn arb_table() -> impl Strategy<Value = AllowedTransitions> {
    proptest::collection::vec(
        (arb_state_key(), proptest::collection::vec(arb_state_key(), 0..4)),
        0..5,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .fold(AllowedTransitions::new(), |table, (from, to)| table.allow(from, to))
    })
}

fn arb_decision() -> impl Strategy<Value = Transition> {
    prop_oneof![
        arb_state_key().prop_map(Transition::To),
        Just(Transition::Stay),
        Just(Transition::Terminate),
        Just(Transition::Undecided),
    ]
}

/// Literal text that contains no braces
fn arb_plain_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,:!?'\n-]{0,40}"
}

#[derive(Debug, Clone)]
enum Segment {
    Text(String),
    Key(String),
}

fn arb_segments() -> impl Strategy<Value = Vec<Segment>> {
    proptest::collection::vec(
        prop_oneof![
            arb_plain_text().prop_map(Segment::Text),
            "[a-z]{1,6}".prop_map(Segment::Key),
        ],
        0..8,
    )
}

fn arb_arguments() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6)
        .prop_map(|m| m.into_iter().map(|(k, v)| (k, json!(v))).collect())
}

fn key_value(key: &str) -> String {
    format!("<{key}>")
}

// ============================================================================
// Transition resolution
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_stay_and_terminate_never_fail(
        table in proptest::option::of(arb_table()),
        from in arb_state_key(),
    ) {
        prop_assert_eq!(
            resolve_next_state(table.as_ref(), &from, Transition::Stay, "end").unwrap(),
            from.clone()
        );
        prop_assert_eq!(
            resolve_next_state(table.as_ref(), &from, Transition::Terminate, "end").unwrap(),
            "end"
        );
    }

    #[test]
    fn prop_resolved_target_respects_table(
        table in arb_table(),
        from in arb_state_key(),
        decision in arb_decision(),
    ) {
        let successors = table.successors(&from).to_vec();
        match (decision.clone(), resolve_next_state(Some(&table), &from, decision, "end")) {
            (Transition::To(target), Ok(next)) => {
                prop_assert_eq!(&next, &target);
                prop_assert!(successors.contains(&target));
            }
            (Transition::To(target), Err(FsmError::InvalidTransition { to, .. })) => {
                prop_assert_eq!(&to, &target);
                prop_assert!(!successors.contains(&target));
            }
            (Transition::Undecided, Ok(next)) => {
                prop_assert!(successors.len() <= 1);
                let expected = successors.first().cloned().unwrap_or_else(|| "end".to_string());
                prop_assert_eq!(next, expected);
            }
            (Transition::Undecided, Err(FsmError::TransitionRequired { candidates, .. })) => {
                prop_assert!(successors.len() > 1);
                prop_assert_eq!(candidates, successors);
            }
            (Transition::Stay | Transition::Terminate, Ok(_)) => {}
            (decision, result) => {
                prop_assert!(false, "unexpected {:?} -> {:?}", decision, result);
            }
        }
    }

    #[test]
    fn prop_no_table_accepts_any_explicit_target(from in arb_state_key(), to in arb_state_key()) {
        prop_assert_eq!(
            resolve_next_state(None, &from, Transition::To(to.clone()), "end").unwrap(),
            to
        );
    }
}

// ============================================================================
// Templates
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_text_without_placeholders_is_unchanged(text in arb_plain_text()) {
        prop_assert_eq!(fill(&text, |_| None).unwrap(), text);
    }

    #[test]
    fn prop_escaped_braces_render_literally(text in "[a-z{} ]{0,30}") {
        let escaped = text.replace('{', "{{").replace('}', "}}");
        prop_assert_eq!(fill(&escaped, |_| None).unwrap(), text);
    }

    #[test]
    fn prop_placeholders_substitute_in_order(segments in arb_segments()) {
        let mut template = String::new();
        let mut expected = String::new();
        for segment in &segments {
            match segment {
                Segment::Text(text) => {
                    template.push_str(text);
                    expected.push_str(text);
                }
                Segment::Key(key) => {
                    template.push_str(&format!("{{{key}}}"));
                    expected.push_str(&key_value(key));
                }
            }
        }
        prop_assert_eq!(fill(&template, |k| Some(key_value(k))).unwrap(), expected);
    }

    #[test]
    fn prop_missing_key_is_named(prefix in arb_plain_text(), key in "[a-z]{1,6}") {
        let template = format!("{prefix}{{{key}}}");
        prop_assert_eq!(fill(&template, |_| None), Err(RenderError::MissingKey(key)));
    }
}

// ============================================================================
// Tool-call extraction
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_tool_arguments_land_under_prefix(
        args in arb_arguments(),
        prefix in proptest::option::of("[A-Z]{1,3}_"),
    ) {
        let mut builder = StateDescriptor::builder("s").output_var("reply_text");
        if let Some(prefix) = &prefix {
            builder = builder.tool_prefix(prefix.clone());
        }
        let state = builder.build().unwrap();

        let mut ctx = Context::new();
        for key in args.keys() {
            ctx.set(key.clone(), json!("before")).unwrap();
        }
        let response = LlmResponse::default().with_tool_call("T", Value::Object(args.clone()));
        let computed = ComputedValues::new(&state.computed);
        let mut draft = ctx.clone();
        apply_response(&state, &response, &mut draft, &computed).unwrap();

        for (key, value) in &args {
            match &prefix {
                Some(prefix) => {
                    prop_assert_eq!(draft.get(&format!("{prefix}{key}")), Some(value));
                    prop_assert_eq!(draft.get(key), Some(&json!("before")));
                }
                None => prop_assert_eq!(draft.get(key), Some(value)),
            }
        }
        prop_assert!(draft.tool_fired("T"));
    }
}

// ============================================================================
// Computed values
// ============================================================================

proptest! {
    #[test]
    fn prop_computed_value_evaluated_once(reads in 1usize..20) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut functions: BTreeMap<String, ComputedFn> = BTreeMap::new();
        functions.insert(
            "x".to_string(),
            Arc::new(move |_: &Context| json!(counter.fetch_add(1, Ordering::SeqCst))),
        );

        let ctx = Context::new();
        let computed = ComputedValues::new(&functions);
        for _ in 0..reads {
            prop_assert_eq!(computed.get("x", &ctx).unwrap(), json!(0));
        }
        prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
