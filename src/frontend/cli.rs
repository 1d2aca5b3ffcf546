use crate::frontend::config::{Config, Pipe};
use crate::infrastructure::{init_dev_logging, init_logging, metrics};
use crate::interop::{find_binary, CallContext, Convention, Function, Kind, Signature, Value};
use crate::memory::Pointer;
use std::path::PathBuf;

const USAGE: &str = "Usage: binutils [OPTIONS] <COMMAND>

Commands:
  describe <signature> [--json]                  Decode a signature string
  call <library> <symbol> <signature> [args...]  Call an exported function
  pipe <config> <name> [args...]                 Call a function from a manifest

A <symbol> with spaces is a hex byte signature, e.g. \"55 8B EC\".

Options:
  --convention <c>  Calling convention for `call` (default: cdecl)
  --config <path>   Config file (default: nearest binutils.toml)
  --verbose         Trace every call to stderr
  --stats           Print interop counters after the command";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Describe {
        signature: String,
        json: bool,
    },
    Call {
        library: String,
        symbol: String,
        signature: String,
        convention: Convention,
        args: Vec<String>,
    },
    Pipe {
        config: PathBuf,
        name: String,
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub stats: bool,
}

pub fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut positional = Vec::new();
    let mut json = false;
    let mut verbose = false;
    let mut stats = false;
    let mut convention = Convention::default();
    let mut config = None;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--json" => json = true,
            "--verbose" | "-v" => verbose = true,
            "--stats" => stats = true,
            "--help" | "-h" => return Err(USAGE.to_string()),
            "--convention" => {
                i += 1;
                let value = args.get(i).ok_or("--convention requires an argument")?;
                convention = value.parse()?;
            }
            "--config" => {
                i += 1;
                let value = args.get(i).ok_or("--config requires an argument")?;
                config = Some(PathBuf::from(value));
            }
            // Everything after `--` is positional, so negative numbers pass through
            "--" => {
                positional.extend(args[i + 1..].iter().cloned());
                break;
            }
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("describe") => Command::Describe {
            signature: positional.next().ok_or("describe requires a signature")?,
            json,
        },
        Some("call") => Command::Call {
            library: positional.next().ok_or("call requires a library")?,
            symbol: positional.next().ok_or("call requires a symbol")?,
            signature: positional.next().ok_or("call requires a signature")?,
            convention,
            args: positional.collect(),
        },
        Some("pipe") => Command::Pipe {
            config: PathBuf::from(positional.next().ok_or("pipe requires a config file")?),
            name: positional.next().ok_or("pipe requires a function name")?,
            args: positional.collect(),
        },
        Some(other) => return Err(format!("Unknown command: {}\n\n{}", other, USAGE)),
        None => return Err(USAGE.to_string()),
    };

    Ok(CliConfig {
        command,
        config,
        verbose,
        stats,
    })
}

fn parse_integer(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// Turn a command-line word into a value for a parameter of `kind`
pub fn parse_value(text: &str, kind: Kind, index: usize) -> crate::Result<Value> {
    let invalid = || crate::Error::ArgumentType {
        index,
        expected: kind,
        found: format!("{:?}", text),
    };

    let raw = match kind {
        Kind::Bool => match text {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(invalid()),
        },
        Kind::Float | Kind::Double => Value::Double(text.parse().map_err(|_| invalid())?),
        Kind::String => match text {
            "null" => Value::None,
            _ => Value::string(text)?,
        },
        Kind::Pointer if text == "null" => Value::Pointer(Pointer::null()),
        _ => {
            let v = parse_integer(text).ok_or_else(invalid)?;
            match (i64::try_from(v), u64::try_from(v)) {
                (Ok(v), _) => Value::LongLong(v),
                (_, Ok(v)) => Value::ULongLong(v),
                _ => return Err(invalid()),
            }
        }
    };
    raw.coerce(kind, index)
}

fn parse_values(function: &Function, args: &[String]) -> crate::Result<Vec<Value>> {
    let params = function.signature().params();
    if params.len() != args.len() {
        return Err(crate::Error::ArgumentCount {
            expected: params.len(),
            got: args.len(),
        });
    }
    args.iter()
        .zip(params)
        .enumerate()
        .map(|(index, (text, kind))| parse_value(text, *kind, index))
        .collect()
}

fn describe(signature: &str, json: bool) -> crate::Result<()> {
    let sig = Signature::parse(signature)?;
    if json {
        let doc = serde_json::json!({
            "signature": sig.to_string(),
            "parameters": sig.params().iter().map(|k| k.c_name()).collect::<Vec<_>>(),
            "return": sig.return_kind().c_name(),
        });
        println!("{}", serde_json::to_string_pretty(&doc).unwrap_or_else(|_| doc.to_string()));
    } else {
        let params: Vec<_> = sig.params().iter().map(|k| k.c_name()).collect();
        let params = if params.is_empty() { "void".to_string() } else { params.join(", ") };
        println!("{} ({}) -> {}", sig, params, sig.return_kind().c_name());
    }
    Ok(())
}

fn call(function: &Function, args: &[String], cache_size: usize) -> crate::Result<()> {
    let values = parse_values(function, args)?;
    let mut ctx = CallContext::with_cache_size(cache_size);
    let result = function.call(&mut ctx, &values)?;
    if ctx.last_error() != 0 {
        eprintln!(
            "warning: {} has no distinct ABI here, called with the default",
            function.convention()
        );
    }
    println!("{}", result);
    Ok(())
}

fn run(cli: &CliConfig, config: &Config) -> crate::Result<()> {
    let cache_size = config.call.cif_cache_size;
    match &cli.command {
        Command::Describe { signature, json } => describe(signature, *json),
        Command::Call {
            library,
            symbol,
            signature,
            convention,
            args,
        } => {
            let library = find_binary(library)?;
            // SAFETY: the command line declares the signature; calling with
            // the wrong one is the user's explicit request
            let function = unsafe { library.function(symbol, *convention, signature)? };
            call(&function, args, cache_size)
        }
        Command::Pipe { config, name, args } => {
            let pipe = Pipe::from_files(&[config])?;
            let function = pipe.get(name)?;
            call(&function, args, cache_size)
        }
    }
}

/// Entry point for CLI binary
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::discover(),
    };

    let _guard = if cli.verbose {
        init_dev_logging()
    } else {
        init_logging(config.logging.to_log_config())
    };

    run(&cli, &config)?;

    if cli.stats {
        eprintln!("{}", metrics::interop().report());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_describe() {
        let cli = parse_args(&args(&["describe", "ii)i", "--json"])).unwrap();
        assert_eq!(
            cli.command,
            Command::Describe {
                signature: "ii)i".to_string(),
                json: true
            }
        );
    }

    #[test]
    fn test_parse_call() {
        let cli = parse_args(&args(&[
            "--convention", "stdcall", "call", "c", "abs", "i)i", "--", "-5",
        ]))
        .unwrap();
        match cli.command {
            Command::Call { convention, args, symbol, .. } => {
                assert_eq!(convention, Convention::Stdcall);
                assert_eq!(symbol, "abs");
                assert_eq!(args, vec!["-5".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["launch"])).is_err());
        assert!(parse_args(&args(&["call", "c"])).is_err());
        assert!(parse_args(&args(&["describe", "i)i", "--bogus"])).is_err());
        assert!(parse_args(&args(&["--convention", "pascal", "describe", "i)i"])).is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("0x10", Kind::Int, 0).unwrap(), Value::Int(16));
        assert_eq!(parse_value("-3", Kind::Char, 0).unwrap(), Value::Char(-3));
        assert_eq!(parse_value("2.5", Kind::Float, 0).unwrap(), Value::Float(2.5));
        assert_eq!(parse_value("true", Kind::Bool, 0).unwrap(), Value::Bool(true));
        assert_eq!(parse_value("null", Kind::Pointer, 0).unwrap(), Value::Pointer(Pointer::null()));
        assert_eq!(parse_value("hi", Kind::String, 0).unwrap().as_str(), Some("hi"));
        assert!(parse_value("300", Kind::UChar, 1).is_err());
        assert!(parse_value("abc", Kind::Int, 0).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_call_libc() {
        let library = find_binary("c").unwrap();
        let function = unsafe { library.function("abs", Convention::Cdecl, "i)i") }.unwrap();
        let values = parse_values(&function, &args(&["-9"])).unwrap();
        assert_eq!(function.call_default(&values).unwrap(), Value::Int(9));
    }
}
