mod cache;
mod output;
mod patterns;
mod scanner;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Mutex;
use std::time::Instant;

use scanner::profile::{ScanOptions, ScanProfile};
use scanner::walk;
use scanner::{Scanner, Severity};

/// cipherscope -- filesystem-wide cryptographic usage scanner.
///
/// Finds weak and deprecated cryptographic primitives in native binaries,
/// Java archives and class files, source trees, and certificate material,
/// and reports structured detections with severity.
#[derive(Parser)]
#[command(name = "cipherscope", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a file or directory tree
    Scan {
        /// Path to scan
        path: PathBuf,

        /// Scan profile (default, institution-strict, developer-max)
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Do not recurse into subdirectories
        #[arg(long)]
        no_recurse: bool,

        /// Do not descend into jar/zip archives
        #[arg(long)]
        no_deep_jar: bool,

        /// Skip system directories (/proc, /sys, /usr/lib, ...)
        #[arg(long)]
        exclude_system_dirs: bool,

        /// Skip developer cache trees (.cargo, .m2, node_modules caches, ...)
        #[arg(long)]
        exclude_dev_dirs: bool,

        /// Only scan paths matching at least one glob (repeatable)
        #[arg(long = "include")]
        include_globs: Vec<String>,

        /// Skip paths matching a glob (repeatable)
        #[arg(long = "exclude")]
        exclude_globs: Vec<String>,

        /// Emit machine-readable PROGRESS:/DETECTION:/SUMMARY: lines
        #[arg(long)]
        stream: bool,

        /// Disable cache (force a fresh scan even if content is unchanged)
        #[arg(long)]
        no_cache: bool,

        /// Pattern definitions file (overrides $CRYPTO_PATTERNS)
        #[arg(long)]
        patterns: Option<PathBuf>,
    },

    /// Validate and summarize the pattern definitions file
    Patterns {
        /// Pattern definitions file (overrides $CRYPTO_PATTERNS)
        #[arg(long)]
        patterns: Option<PathBuf>,
    },

    /// Clear all cached scan results
    ClearCache,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("{} verbose mode enabled", "cipherscope:".bold().cyan());
    }

    let exit_code = match cli.command {
        Commands::Scan {
            path,
            profile,
            no_recurse,
            no_deep_jar,
            exclude_system_dirs,
            exclude_dev_dirs,
            include_globs,
            exclude_globs,
            stream,
            no_cache,
            patterns,
        } => cmd_scan(ScanArgs {
            path,
            profile,
            no_recurse,
            no_deep_jar,
            exclude_system_dirs,
            exclude_dev_dirs,
            include_globs,
            exclude_globs,
            stream,
            no_cache,
            patterns,
            format: cli.format.clone(),
            verbose: cli.verbose,
        }),

        Commands::Patterns { patterns } => cmd_patterns(patterns.as_deref(), &cli.format),

        Commands::ClearCache => cmd_clear_cache(),
    };

    process::exit(exit_code);
}

struct ScanArgs {
    path: PathBuf,
    profile: String,
    no_recurse: bool,
    no_deep_jar: bool,
    exclude_system_dirs: bool,
    exclude_dev_dirs: bool,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
    stream: bool,
    no_cache: bool,
    patterns: Option<PathBuf>,
    format: String,
    verbose: bool,
}

fn parse_profile(name: &str) -> Option<ScanProfile> {
    match name.to_lowercase().as_str() {
        "default" => Some(ScanProfile::Default),
        "institution-strict" | "institution_strict" | "institutionstrict" | "strict" => {
            Some(ScanProfile::InstitutionStrict)
        }
        "developer-max" | "developer_max" | "developermax" | "max" => {
            Some(ScanProfile::DeveloperMax)
        }
        _ => None,
    }
}

fn load_registry(path_override: Option<&Path>, verbose: bool) -> patterns::Registry {
    let registry = match path_override {
        Some(p) => patterns::Registry::load_from(p),
        None => patterns::Registry::load(),
    };
    for warning in &registry.warnings {
        eprintln!("{} {}", "warning:".bold().yellow(), warning);
    }
    if verbose {
        eprintln!(
            "loaded {} regex, {} byte, {} AST pattern(s) from {}",
            registry.regex.len(),
            registry.bytes.len(),
            registry.ast_rules.len(),
            registry.source
        );
    }
    registry
}

fn exit_code_for(result: &scanner::ScanResult) -> i32 {
    if result
        .detections
        .iter()
        .any(|d| d.severity == Severity::High)
    {
        2
    } else {
        0
    }
}

fn cmd_scan(args: ScanArgs) -> i32 {
    if !args.path.exists() {
        eprintln!(
            "{} path does not exist: {}",
            "error:".bold().red(),
            args.path.display()
        );
        return 1;
    }

    let Some(profile) = parse_profile(&args.profile) else {
        eprintln!(
            "{} unknown profile '{}' (expected default, institution-strict, developer-max)",
            "error:".bold().red(),
            args.profile
        );
        return 1;
    };

    let opt = ScanOptions {
        recurse: !args.no_recurse,
        deep_jar: !args.no_deep_jar,
        exclude_system_dirs: args.exclude_system_dirs,
        exclude_dev_dirs: args.exclude_dev_dirs,
        profile,
        include_globs: args.include_globs,
        exclude_globs: args.exclude_globs,
        ..Default::default()
    };

    if !args.stream && args.format != "json" {
        println!(
            "{} scanning {}...",
            "cipherscope:".bold().cyan(),
            args.path.display().to_string().bold()
        );
    }

    // Cache only full default scans; anything filtered would poison it.
    let use_cache = !args.no_cache
        && !args.stream
        && profile == ScanProfile::Default
        && opt.recurse
        && opt.include_globs.is_empty()
        && opt.exclude_globs.is_empty()
        && args.path.is_dir();

    if use_cache {
        if let Some(cached) = cache::load_cached(&args.path) {
            if args.format != "json" {
                println!("{} using cached result", "cipherscope:".bold().green());
            }
            output::print_scan_summary(&cached, &args.format);
            output::print_detections(&cached, &args.format);
            output::print_severity_summary(&cached, &args.format);
            return exit_code_for(&cached);
        } else if args.verbose {
            eprintln!("no cache entry found, scanning fresh");
        }
    }

    let registry = load_registry(args.patterns.as_deref(), args.verbose);
    let scanner = Scanner::new(registry);

    let result = if args.stream {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let detections: Mutex<Vec<scanner::Detection>> = Mutex::new(Vec::new());
        let totals: Mutex<(u64, u64)> = Mutex::new((0, 0));
        walk::scan_path(
            &scanner,
            &args.path,
            &opt,
            |d| {
                output::stream_detection(d);
                detections
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .push(d.clone());
            },
            |path, files_done, files_total, bytes_done, _bytes_total| {
                output::stream_progress(path, files_done, files_total);
                *totals.lock().unwrap_or_else(|p| p.into_inner()) = (files_done, bytes_done);
            },
            || false,
        );
        let (files_scanned, bytes_scanned) = *totals.lock().unwrap_or_else(|p| p.into_inner());
        let result = scanner::ScanResult {
            detections: detections.into_inner().unwrap_or_else(|p| p.into_inner()),
            files_scanned,
            bytes_scanned,
            duration_ms: start.elapsed().as_millis() as u64,
            started_at,
        };
        output::stream_summary(&result);
        return exit_code_for(&result);
    } else {
        walk::run_scan(&scanner, &args.path, &opt)
    };

    output::print_scan_summary(&result, &args.format);
    output::print_detections(&result, &args.format);
    output::print_severity_summary(&result, &args.format);

    if use_cache {
        if let Err(err) = cache::save_to_cache(&args.path, &result) {
            if args.verbose {
                eprintln!("cache save failed: {}", err);
            }
        } else if args.verbose {
            eprintln!("result cached successfully");
        }
    }

    exit_code_for(&result)
}

fn cmd_patterns(path_override: Option<&Path>, format: &str) -> i32 {
    let registry = load_registry(path_override, false);

    if format == "json" {
        let summary = serde_json::json!({
            "source": registry.source,
            "regex_patterns": registry.regex.len(),
            "byte_patterns": registry.bytes.len(),
            "ast_rules": registry.ast_rules.len(),
            "warnings": registry.warnings,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        println!(
            "{} patterns from {}",
            "cipherscope:".bold().cyan(),
            registry.source.as_str().bold()
        );
        println!("  {} regex pattern(s)", registry.regex.len());
        println!("  {} byte pattern(s)", registry.bytes.len());
        println!("  {} AST rule(s)", registry.ast_rules.len());
        let dupes = patterns::duplicate_names(&registry);
        if !dupes.is_empty() {
            println!(
                "  {} duplicate name(s): {}",
                "warning:".bold().yellow(),
                dupes.join(", ")
            );
        }
    }

    if registry.regex.is_empty() && registry.bytes.is_empty() {
        1
    } else {
        0
    }
}

fn cmd_clear_cache() -> i32 {
    match cache::clear_cache() {
        Ok(count) => {
            println!(
                "{} cleared {} cached scan result(s)",
                "cipherscope:".bold().green(),
                count
            );
            0
        }
        Err(err) => {
            eprintln!("{} failed to clear cache: {}", "error:".bold().red(), err);
            1
        }
    }
}
