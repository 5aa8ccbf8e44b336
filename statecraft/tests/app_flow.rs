//! End-to-end flows through derived actions, composed stores and async edges

use std::sync::Arc;
use std::time::Duration;

use statecraft::logging::{ActionLogConfig, LoggerConfig};
use statecraft::prelude::*;
use statecraft::testing::Recorder;
use statecraft::{spawn_dispatch_loop, LoopStats};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default, PartialEq)]
struct Session {
    user: Option<String>,
}

#[derive(Action, Clone, Debug)]
enum AppAction {
    #[action(init)]
    Init,
    Login(String),
    Logout,
    AddTodo(String),
    #[action(thunk)]
    Run(Thunk<Session, AppAction, AppEffect>),
}

#[derive(Effect, Debug, PartialEq)]
enum AppEffect {
    Welcome(String),
}

#[derive(Clone, Debug, PartialEq)]
struct Summary {
    user: Option<String>,
    todos: usize,
}

fn session(action: &AppAction, state: Option<&Session>) -> Session {
    let mut session = state.cloned().unwrap_or_default();
    match action {
        AppAction::Login(user) => session.user = Some(user.clone()),
        AppAction::Logout => session.user = None,
        _ => {}
    }
    session
}

fn todos(action: &AppAction, state: Option<&Vec<String>>) -> Vec<String> {
    let mut todos = state.cloned().unwrap_or_default();
    if let AppAction::AddTodo(todo) = action {
        todos.push(todo.clone());
    }
    todos
}

fn summarize(session: &Session, todos: &Vec<String>) -> Summary {
    Summary {
        user: session.user.clone(),
        todos: todos.len(),
    }
}

#[test]
fn test_composite_over_derived_stores() {
    let logger = LoggingMiddleware::with_log(ActionLogConfig::new(
        10,
        LoggerConfig::new(None, Some("AddTodo")),
    ));
    let log = logger.log().unwrap();
    let session_store: Store<Session, AppAction, AppEffect> =
        Store::builder(session).middleware(logger).build_init();
    let todo_store: Store<Vec<String>, AppAction, AppEffect> = Store::init(todos);
    let app = combine2(&session_store, &todo_store, summarize)
        .name("app")
        .build();

    let summaries = Recorder::new();
    app.subscribe(&summaries);

    app.dispatch_action(AppAction::Login("ada".into())).unwrap();
    app.dispatch_action(AppAction::AddTodo("write tests".into()))
        .unwrap();
    todo_store
        .dispatch_action(AppAction::AddTodo("ship".into()))
        .unwrap();

    assert_eq!(
        summaries.last(),
        Some(Summary {
            user: Some("ada".into()),
            todos: 2,
        })
    );
    assert_eq!(summaries.values()[0], Summary { user: None, todos: 0 });

    // Init went through the logger at construction; AddTodo is filtered out
    let log = log.lock().unwrap();
    let names: Vec<_> = log.entries().map(|entry| entry.name).collect();
    assert_eq!(names, vec!["Init", "Login"]);
    assert!(log.entries().all(|entry| entry.state_changed == Some(true)));
}

#[test]
fn test_child_store_inside_composite() {
    let session_store: Store<Session, AppAction, AppEffect> = Store::init(session);
    let drafts = session_store.child_store(
        |action: &AppAction, state: Option<&Vec<String>>| match action {
            AppAction::Logout => Vec::new(),
            other => todos(other, state),
        },
        Vec::new(),
    );
    let todo_store: Store<Vec<String>, AppAction, AppEffect> = Store::init(todos);
    let app = combine2(
        &drafts,
        &todo_store,
        |pair: &Pair<Session, Vec<String>>, todos: &Vec<String>| {
            (pair.parent.user.clone(), pair.child.len(), todos.len())
        },
    )
    .build();

    app.dispatch_action(AppAction::Login("grace".into())).unwrap();
    app.dispatch_action(AppAction::AddTodo("draft".into())).unwrap();
    assert_eq!(*app.state(), (Some("grace".into()), 1, 1));

    session_store.dispatch_action(AppAction::Logout).unwrap();
    assert_eq!(*app.state(), (None, 0, 1));
}

#[tokio::test]
async fn test_async_thunk_dispatches_back() {
    let store: Store<Session, AppAction, AppEffect> = Store::builder(session)
        .middleware(ThunkMiddleware)
        .build_init();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let welcomes = Arc::new(move |effect: Arc<AppEffect>| {
        let _ = tx.send(effect);
    });
    store.add_listener(&welcomes);

    let login: Thunk<Session, AppAction, AppEffect> = Thunk::future("login", |dispatcher, _state| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        dispatcher.dispatch_action(AppAction::Login("linus".into()))?;
        dispatcher.dispatch_effect(AppEffect::Welcome("linus".into()))
    });
    store.dispatch_action(AppAction::Run(login)).unwrap();
    assert_eq!(store.state().user, None);

    let welcome = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*welcome, AppEffect::Welcome("linus".into()));
    assert_eq!(store.state().user.as_deref(), Some("linus"));
}

#[tokio::test]
async fn test_dispatch_loop_feeds_composite() {
    let session_store: Store<Session, AppAction, AppEffect> = Store::init(session);
    let todo_store: Store<Vec<String>, AppAction, AppEffect> = Store::init(todos);
    let app = combine2(&session_store, &todo_store, summarize).build();

    let (tx, rx) = mpsc::unbounded_channel();
    let handle = spawn_dispatch_loop(app.dispatcher(), rx, CancellationToken::new());

    let producers: Vec<_> = (0..4)
        .map(|n| {
            let tx = tx.clone();
            tokio::spawn(async move {
                tx.send(Dispatchable::Action(AppAction::AddTodo(format!("todo {n}"))))
                    .unwrap();
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    tx.send(Dispatchable::Action(AppAction::Login("ken".into())))
        .unwrap();
    drop(tx);

    let stats = handle.await.unwrap();
    assert_eq!(
        stats,
        LoopStats {
            dispatched: 5,
            failed: 0
        }
    );
    assert_eq!(
        *app.state(),
        Summary {
            user: Some("ken".into()),
            todos: 4,
        }
    );
}
