//! Routes the crate's tracing spans/events to stdout. Requires the
//! `profiling` feature: `cargo run --example profiling_basics --features profiling`.

#[cfg(feature = "profiling")]
fn main() {
    use archetype_ecs::system::{AccessDecl, QuerySystem};
    use archetype_ecs::{App, BoxedSystem};

    tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).init();

    #[derive(Debug, Clone, Copy)]
    struct Position {
        x: f32,
    }

    fn nudge() -> BoxedSystem {
        Box::new(QuerySystem::new(
            "nudge",
            AccessDecl::new().write::<Position>(),
            |view, _cmds| view.get_mut::<Position>().unwrap().x += 1.0,
        ))
    }

    let mut app = App::new();
    app.world_mut().spawn((Position { x: 0.0 },));
    app.add_system(nudge());
    app.update().expect("update");
}

#[cfg(not(feature = "profiling"))]
fn main() {
    eprintln!("rerun with --features profiling to see tracing output");
}
