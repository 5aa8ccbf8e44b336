//! Tests for #[derive(Effect)]

#![allow(dead_code)]

use std::sync::Arc;

use statecraft::testing::Recorder;
use statecraft::{Action, Effect, Store};

#[derive(Effect, Debug, PartialEq)]
enum UiEffect {
    Toast(String),
    ScrollToTop,
    Focus { field: &'static str },
}

#[derive(Effect, Debug)]
struct Beep;

#[derive(Effect, Debug)]
struct Navigate(&'static str);

#[derive(Action, Clone, Debug)]
enum Noop {
    Tick,
}

#[test]
fn test_enum_effect_names() {
    assert_eq!(UiEffect::Toast("hi".into()).name(), "Toast");
    assert_eq!(UiEffect::ScrollToTop.name(), "ScrollToTop");
    assert_eq!(UiEffect::Focus { field: "search" }.name(), "Focus");
}

#[test]
fn test_struct_effect_names() {
    assert_eq!(Beep.name(), "Beep");
    assert_eq!(Navigate("/home").name(), "Navigate");
}

#[test]
fn test_derived_effects_reach_listeners() {
    let store: Store<u8, Noop, UiEffect> = Store::new(|_: &Noop, s: Option<&u8>| s.copied().unwrap_or(0), 0);
    let all = Recorder::new();
    let toasts: Arc<Recorder<String>> = Recorder::new();
    store.add_listener(&all);
    store.add_listener_with(&toasts, |effect: &Arc<UiEffect>| match effect.as_ref() {
        UiEffect::Toast(text) => Some(text.clone()),
        _ => None,
    });

    store.dispatch_effect(UiEffect::ScrollToTop).unwrap();
    store.dispatch_effect(UiEffect::Toast("saved".into())).unwrap();
    store.dispatch_action(Noop::Tick).unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(*all.values()[0], UiEffect::ScrollToTop);
    assert_eq!(toasts.values(), vec!["saved".to_string()]);
}
