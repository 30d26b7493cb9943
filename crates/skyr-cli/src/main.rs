use std::sync::Arc;
use std::time::Instant;
use std::{env, process::ExitCode};

use skyr::{
    DefaultMapper, Label, LoadGraph, Loader, OsFileSystem, Semantics, StandardPredeclared,
};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let (root, label) = match args.as_slice() {
        [_, root, label] => (root.clone(), label.clone()),
        [_, label] => (".".to_owned(), label.clone()),
        _ => {
            eprintln!("usage: skyr [ROOT_DIR] LABEL\n\nexample: skyr . //pkg:defs.bzl");
            return ExitCode::FAILURE;
        }
    };

    let label = match Label::parse(&label, None) {
        Ok(label) => label,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let loader = Arc::new(Loader::new(
        Arc::new(OsFileSystem::new(root)),
        Arc::new(StandardPredeclared::new()),
    ));
    let graph = LoadGraph::new(
        loader,
        Arc::new(DefaultMapper),
        Arc::new(Semantics::new()),
    );

    let start = Instant::now();
    match graph.load_extension(label) {
        Ok(result) => {
            let elapsed = start.elapsed();
            for (name, value) in result.exports.exports() {
                println!("{name} = {}", value.repr());
            }
            eprintln!(
                "loaded {} binding(s), {} dep(s) in {elapsed:?}",
                result.exports.exports().len(),
                result.deps.len()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
