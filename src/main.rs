use std::fs;
use std::io::{self, Read};

use lattok::{Registry, Tokenizer};
use rayon::prelude::*;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Args {
    definitions: Vec<(String, String)>,
    model: Option<String>,
    all: bool,
    ids: bool,
    tokens: bool,
    decode: bool,
    help: bool,
    version: bool,
    paths: Vec<String>,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args {
        definitions: Vec::new(),
        model: None,
        all: false,
        ids: false,
        tokens: false,
        decode: false,
        help: false,
        version: false,
        paths: Vec::new(),
    };

    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "-V" | "--version" => args.version = true,
            "-h" | "--help" => args.help = true,
            "-a" | "--all" => args.all = true,
            "--ids" => args.ids = true,
            "--tokens" => args.tokens = true,
            "--decode" => args.decode = true,
            "-d" | "--definition" => {
                i += 1;
                if i >= argv.len() {
                    fail("--definition requires a value");
                }
                args.definitions.push(parse_definition_arg(&argv[i]));
            }
            "-m" | "--model" => {
                i += 1;
                if i >= argv.len() {
                    fail("--model requires a value");
                }
                args.model = Some(argv[i].clone());
            }
            s if s.starts_with('-') => fail(&format!("unknown option: {}", s)),
            _ => args.paths.push(argv[i].clone()),
        }
        i += 1;
    }
    args
}

/// `name=path.json`, or a bare path keyed by its file stem.
fn parse_definition_arg(arg: &str) -> (String, String) {
    if let Some((name, path)) = arg.split_once('=') {
        return (name.to_string(), path.to_string());
    }
    let stem = std::path::Path::new(arg)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| arg.to_string());
    (stem, arg.to_string())
}

fn fail(msg: &str) -> ! {
    eprintln!("Error: {}", msg);
    std::process::exit(1);
}

fn print_help() {
    println!(
        "Usage: lattok -d <name=definition.json> [options] [path...]\n\
         \n\
         Count, encode or decode text with Unigram or byte-level BPE tokenizers.\n\
         \n\
         Options:\n\
         \x20 -d, --definition <name=file>  Load a tokenizer definition (repeatable)\n\
         \x20 -m, --model <name>            Tokenizer to use (default: first definition)\n\
         \x20 -a, --all                     Show counts for every loaded tokenizer\n\
         \x20 --ids                         Print token ids instead of counts\n\
         \x20 --tokens                      Print token objects as JSON\n\
         \x20 --decode                      Read whitespace-separated ids and print text\n\
         \x20 -V, --version                 Show version\n\
         \x20 -h, --help                    Show this help\n\
         \n\
         When no paths are given, reads from stdin. Set RUST_LOG=debug for\n\
         construction details."
    );
}

fn format_line(count: &str, label: &str) -> String {
    format!("{:>8} {}\n", count, label)
}

fn read_stdin() -> String {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .unwrap_or_else(|e| fail(&format!("reading stdin: {}", e)));
    buf
}

struct Input {
    name: Option<String>,
    text: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = parse_args();

    if args.version {
        println!("lattok {}", VERSION);
        return;
    }
    if args.help {
        print_help();
        return;
    }
    if args.definitions.is_empty() {
        fail("at least one --definition is required");
    }

    let mut registry = Registry::new();
    for (name, path) in &args.definitions {
        let tokenizer = Tokenizer::from_path(path)
            .unwrap_or_else(|e| fail(&format!("loading {} from {}: {}", name, path, e)));
        debug!(name = %name, vocab_size = tokenizer.vocab_size(), "loaded tokenizer");
        registry.insert(name.clone(), tokenizer);
    }

    let model_names: Vec<String> = if args.all {
        registry.keys().map(str::to_string).collect()
    } else {
        vec![args.model.clone().unwrap_or_else(|| args.definitions[0].0.clone())]
    };
    let tokenizers: Vec<(&str, &Tokenizer)> = model_names
        .iter()
        .map(|m| {
            let tok = registry.get(m).unwrap_or_else(|e| {
                let available: Vec<&str> = registry.keys().collect();
                fail(&format!("{}\nAvailable: {}", e, available.join(", ")))
            });
            (m.as_str(), tok)
        })
        .collect();

    if args.decode {
        let ids: Vec<u32> = read_stdin()
            .split_whitespace()
            .map(|s| s.trim_matches(|c| c == ',' || c == '[' || c == ']'))
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap_or_else(|_| fail(&format!("not a token id: {}", s))))
            .collect();
        println!("{}", tokenizers[0].1.decode(&ids));
        return;
    }

    let inputs: Vec<Input> = if args.paths.is_empty() {
        vec![Input { name: None, text: read_stdin() }]
    } else {
        args.paths
            .iter()
            .map(|p| {
                let text = fs::read_to_string(p).unwrap_or_else(|e| fail(&format!("reading {}: {}", p, e)));
                Input { name: Some(p.clone()), text }
            })
            .collect()
    };

    if args.ids || args.tokens {
        let tok = tokenizers[0].1;
        for input in &inputs {
            if let Some(name) = &input.name {
                println!("# {}", name);
            }
            if args.tokens {
                let objects = tok.token_objects(&input.text);
                let json = serde_json::to_string(&objects)
                    .unwrap_or_else(|e| fail(&format!("serializing tokens: {}", e)));
                println!("{}", json);
            } else {
                let ids: Vec<String> = tok.encode(&input.text).iter().map(u32::to_string).collect();
                println!("{}", ids.join(" "));
            }
        }
        return;
    }

    let use_parallel = inputs.len() > 1;

    if args.all {
        let count_all = |input: &Input| -> Vec<usize> {
            tokenizers.iter().map(|(_, tok)| tok.count_tokens(&input.text)).collect()
        };
        let results: Vec<Vec<usize>> = if use_parallel {
            inputs.par_iter().map(count_all).collect()
        } else {
            inputs.iter().map(count_all).collect()
        };
        for (input, counts) in inputs.iter().zip(results.iter()) {
            let label = input.name.as_deref().unwrap_or("stdin");
            for ((model_name, _), count) in tokenizers.iter().zip(counts.iter()) {
                print!("{}", format_line(&count.to_string(), &format!("{} ({})", label, model_name)));
            }
        }
    } else {
        let tok = tokenizers[0].1;
        let count_one = |input: &Input| tok.count_tokens(&input.text);
        let counts: Vec<usize> = if use_parallel {
            inputs.par_iter().map(count_one).collect()
        } else {
            inputs.iter().map(count_one).collect()
        };
        let total: usize = counts.iter().sum();
        if inputs.len() > 1 {
            for (input, count) in inputs.iter().zip(counts.iter()) {
                print!("{}", format_line(&count.to_string(), input.name.as_deref().unwrap_or("")));
            }
            print!("{}", format_line(&total.to_string(), "total"));
        } else {
            print!("{}", format_line(&total.to_string(), inputs[0].name.as_deref().unwrap_or("")));
        }
    }
}
