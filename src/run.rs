use crate::db::SignatureStore;
use crate::error::BuildError;
use crate::fs::RealFileSystem;
use crate::graph::{Graph, NodeId};
use crate::make;
use crate::node::ChangePolicy;
use crate::progress::ConsoleProgress;
use crate::work::{resolve_parallelism, Options, Work};
use anyhow::Context;
use argh::FromArgs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Bring Makefile targets up to date, rebuilding only what changed.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    directory: Option<String>,

    /// input Makefile [default=Makefile]
    #[argh(option, short = 'f', default = "String::from(\"Makefile\")")]
    file: String,

    /// parallelism; 0 picks one job per CPU [default=unbounded]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// consider every target out of date
    #[argh(switch, short = 'B')]
    always_make: bool,

    /// keep building independent targets after a failure
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// treat any timestamp change as a change, without comparing contents
    #[argh(switch)]
    timestamps: bool,

    /// debug logging (otherwise from $MASON_LOG)
    #[argh(switch, short = 'd')]
    debug: bool,

    /// signature database [default=.mason.db]
    #[argh(option, default = "String::from(\".mason.db\")")]
    db: String,

    /// targets to build [default=first rule's targets]
    #[argh(positional)]
    targets: Vec<String>,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("MASON_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolve requested target names and hang them off a single goal node.
fn goal(graph: &mut Graph, names: &[String], defaults: Vec<NodeId>) -> anyhow::Result<NodeId> {
    let mut targets = Vec::new();
    for name in names {
        match graph.resolve(name) {
            Some(id) => targets.push(id),
            None => return Err(BuildError::UnknownTarget(name.clone()).into()),
        }
    }
    if targets.is_empty() {
        targets = defaults;
    }
    if targets.is_empty() {
        anyhow::bail!("no target specified and no default");
    }
    let goal = graph.add_dummy("end goal");
    for target in targets {
        graph.add_edge(goal, target);
    }
    Ok(goal)
}

fn run_impl(args: Args) -> anyhow::Result<i32> {
    if let Some(dir) = &args.directory {
        std::env::set_current_dir(dir).with_context(|| format!("chdir {:?}", dir))?;
    }

    let makefile = make::read(Path::new(&args.file))?;
    let root = std::env::current_dir().context("current directory")?;
    let mut graph = Graph::new(&root);
    if args.timestamps {
        graph.set_default_policy(ChangePolicy::Timestamp);
    }
    let defaults = makefile.load(&mut graph)?;
    let goal = goal(&mut graph, &args.targets, defaults)?;

    let fs = RealFileSystem::new();
    let mut store =
        SignatureStore::open(Path::new(&args.db)).with_context(|| format!("opening {}", args.db))?;
    let options = Options {
        parallelism: resolve_parallelism(args.jobs),
        always_build: args.always_make,
        keep_going: args.keep_going,
    };
    let mut progress = ConsoleProgress::new(args.verbose);

    let result = Work::new(&mut graph, &mut store, &fs, &mut progress, options).run(goal);
    store.close(&graph, &fs);

    match result {
        Ok(0) => {
            // Special case: don't print numbers when no work done.
            println!("mason: no work to do");
            Ok(0)
        }
        Ok(n) => {
            println!("mason: ran {} tasks, now up to date", n);
            Ok(0)
        }
        Err(err) => match err.downcast_ref::<BuildError>() {
            // Don't print any summary, the failing task is enough info.
            Some(BuildError::TasksFailed { .. }) => Ok(1),
            _ => Err(err),
        },
    }
}

pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();
    init_logging(args.debug);
    run_impl(args)
}
