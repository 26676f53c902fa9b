use std::{path::PathBuf, process};

fn main() {
    use clap::{crate_authors, crate_name, crate_version, Arg, Command};
    let cmd = Command::new(crate_name!())
        .author(crate_authors!())
        .version(crate_version!())
        .about("Build + dev support for kroxide")
        .subcommand_required(true)
        .subcommands([
            Command::new("schema")
                .about("dump JSON Schema for the core data-model types")
                .arg(
                    Arg::new("out_dir")
                        .long("out-dir")
                        .value_name("DIR")
                        .help("directory to write schema files into; defaults to stdout"),
                ),
            Command::new("lint-expr")
                .about("parse and analyze an expression, printing its CEL lowering and references")
                .arg(Arg::new("expr").required(true)),
        ]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("schema", m)) => schema(m.get_one::<String>("out_dir").map(PathBuf::from)),
        Some(("lint-expr", m)) => lint_expr(m.get_one::<String>("expr").unwrap()),
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

type DynError = Box<dyn std::error::Error>;
type Result<T> = std::result::Result<T, DynError>;

fn schema(out_dir: Option<PathBuf>) -> Result<()> {
    use kroxide_types::{FieldPath, Reference, ResourceId};

    let docs: [(&str, schemars::Schema); 3] = [
        ("resource-id", schemars::schema_for!(ResourceId)),
        ("field-path", schemars::schema_for!(FieldPath)),
        ("reference", schemars::schema_for!(Reference)),
    ];
    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            for (name, schema) in &docs {
                let out = dir.join(format!("{name}.json"));
                std::fs::write(&out, serde_json::to_string_pretty(schema)?)?;
                println!("wrote: {}", out.display());
            }
        }
        None => {
            for (name, schema) in &docs {
                println!("# {name}");
                println!("{}", serde_json::to_string_pretty(schema)?);
            }
        }
    }
    Ok(())
}

fn lint_expr(text: &str) -> Result<()> {
    let expr = kroxide_expr::parse_text(text)?;
    let analysis = kroxide_expr::analyze(&expr, kroxide_expr::AnalysisContext::Unconstrained, &|_| None)?;
    println!("cel: {}", analysis.cel);
    println!("references:");
    for r in &analysis.references {
        println!("  {r}");
    }
    for d in &analysis.diagnostics {
        println!("warning: {}", d.message);
    }
    Ok(())
}
