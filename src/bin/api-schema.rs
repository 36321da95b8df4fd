//! API Schema CLI
//!
//! Command-line interface for documenting, calling, checking and linting
//! the bundled demo API.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use http::header::{HeaderName, HeaderValue};
use tracing_subscriber::EnvFilter;
use url::form_urlencoded;

use api_schema::{
    demo, document, lint, load_payload_auto, read_text, resource_json_schema, validate_rendered,
    Api, CheckError, PipelineSettings, RouteParams, Severity, TargetStatus,
};

#[derive(Parser)]
#[command(name = "api-schema")]
#[command(about = "Document, call, check and lint the demo JSON API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the API documentation as JSON
    Doc {
        /// Print the output JSON Schema of one resource instead
        #[arg(long)]
        resource: Option<String>,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Run one endpoint through the request pipeline
    Call {
        /// Route name of the endpoint (e.g., parse_time)
        route: String,

        /// Query argument as key=value (repeatable)
        #[arg(long = "arg", short = 'a', value_parser = parse_pair::<'='>)]
        args: Vec<(String, String)>,

        /// Route parameter as key=value (repeatable)
        #[arg(long = "param", short = 'p', value_parser = parse_pair::<'='>)]
        params: Vec<(String, String)>,

        /// Request header as name:value (repeatable)
        #[arg(long = "header", short = 'H', value_parser = parse_pair::<':'>)]
        headers: Vec<(String, String)>,

        /// File whose contents become the request body
        #[arg(long)]
        body: Option<PathBuf>,

        /// Fallback Cache-Control for endpoints that declare none
        #[arg(long)]
        cache_control: Option<String>,
    },

    /// Check a rendered payload against a resource's output schema
    Check {
        /// Payload source: file path or URL (http:// or https://)
        payload: String,

        /// Resource name (e.g., DateTime)
        #[arg(long)]
        resource: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,
    },

    /// Lint the API declarations
    Lint {
        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress passing entries, only show problems
        #[arg(long, short)]
        quiet: bool,
    },
}

fn parse_pair<const SEP: char>(s: &str) -> Result<(String, String), String> {
    s.split_once(SEP)
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected `key{}value`, got `{}`", SEP, s))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let api = match demo::api() {
        Ok(api) => api,
        Err(e) => {
            eprintln!("Error: invalid API declaration: {}", e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Commands::Doc {
            resource,
            output,
            pretty,
        } => run_doc(&api, resource.as_deref(), output, pretty),

        Commands::Call {
            route,
            args,
            params,
            headers,
            body,
            cache_control,
        } => run_call(
            &api,
            CallArgs {
                route,
                args,
                params,
                headers,
                body,
                cache_control,
            },
        ),

        Commands::Check {
            payload,
            resource,
            json,
        } => run_check(&api, &payload, &resource, json),

        Commands::Lint {
            format,
            strict,
            quiet,
        } => run_lint(&api, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn run_doc(api: &Api, resource: Option<&str>, output: Option<PathBuf>, pretty: bool) -> Result<(), u8> {
    let doc = match resource {
        Some(name) => {
            let resource = api.resource(name).ok_or_else(|| {
                eprintln!("Error: unknown resource: {}", name);
                2u8
            })?;
            resource_json_schema(resource).map_err(|e| {
                eprintln!("Error: {}", e);
                2u8
            })?
        }
        None => document(api),
    };

    let json_output = if pretty {
        serde_json::to_string_pretty(&doc)
    } else {
        serde_json::to_string(&doc)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

struct CallArgs {
    route: String,
    args: Vec<(String, String)>,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<PathBuf>,
    cache_control: Option<String>,
}

fn run_call(api: &Api, call: CallArgs) -> Result<(), u8> {
    let endpoint = api.endpoint(&call.route).ok_or_else(|| {
        eprintln!("Error: unknown route: {}", call.route);
        2u8
    })?;

    let body = match &call.body {
        Some(path) => read_body(path)?,
        None => String::new(),
    };

    let mut uri = endpoint_path(endpoint.uri(), &call.params);
    if !call.args.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&call.args)
            .finish();
        uri = format!("{}?{}", uri, query);
    }

    let mut builder = http::Request::builder()
        .method(endpoint.method().clone())
        .uri(&uri)
        .extension(RouteParams(call.params.into_iter().collect()));
    for (name, value) in &call.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            eprintln!("Error: invalid header name `{}`: {}", name, e);
            2u8
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            eprintln!("Error: invalid header value `{}`: {}", value, e);
            2u8
        })?;
        builder = builder.header(name, value);
    }
    let request = builder.body(body).map_err(|e| {
        eprintln!("Error: invalid request: {}", e);
        2u8
    })?;

    let mut settings = PipelineSettings::new();
    if let Some(value) = call.cache_control {
        settings = settings.default_cache_control(value);
    }
    let pipeline = demo::pipeline(settings).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    let response = pipeline.execute(endpoint, request).map_err(|e| {
        eprintln!("Error: {}", e);
        1u8
    })?;

    println!("HTTP/1.1 {}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();
    if !response.body.is_empty() {
        println!("{}", response.body);
    }

    if response.status.is_client_error() || response.status.is_server_error() {
        Err(1)
    } else {
        Ok(())
    }
}

fn read_body(path: &Path) -> Result<String, u8> {
    read_text(path).map_err(|e| {
        eprintln!("Error: loading body: {}", e);
        e.exit_code() as u8
    })
}

/// Fill `<name>` segments of a URI template from route parameters.
fn endpoint_path(template: &str, params: &[(String, String)]) -> String {
    template
        .split('/')
        .map(|segment| {
            let name = segment
                .strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'));
            match name {
                Some(name) => params
                    .iter()
                    .find(|(k, _)| k == name)
                    .map_or_else(|| segment.to_string(), |(_, v)| v.clone()),
                None => segment.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn run_check(api: &Api, source: &str, resource_name: &str, json_output: bool) -> Result<(), u8> {
    let resource = api.resource(resource_name).ok_or_else(|| {
        report_error(json_output, &format!("unknown resource: {}", resource_name));
        2u8
    })?;

    let payload = load_payload_auto(source).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;

    match validate_rendered(resource, &payload) {
        Ok(()) => {
            if json_output {
                println!(r#"{{"valid":true}}"#);
            } else {
                println!("Valid");
            }
            Ok(())
        }
        Err(CheckError::Invalid { errors }) => {
            if json_output {
                let output = serde_json::json!({
                    "valid": false,
                    "errors": errors
                });
                println!("{}", output);
            } else {
                eprintln!("Validation failed:");
                for error in errors {
                    eprintln!("  {}", error);
                }
            }
            Err(1)
        }
        Err(e) => {
            report_error(json_output, &e.to_string());
            Err(e.exit_code() as u8)
        }
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({ "valid": false, "error": msg }));
    } else {
        eprintln!("Error: {}", msg);
    }
}

fn run_lint(api: &Api, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    let result = lint(api, strict);

    if format == "json" {
        let output = serde_json::to_string_pretty(&result).map_err(|e| {
            eprintln!("Error serializing output: {}", e);
            2u8
        })?;
        println!("{}", output);
    } else {
        if !quiet {
            println!("Linting demo API ...\n");
        }

        for target in &result.results {
            let status_icon = match target.status {
                TargetStatus::Ok => "\x1b[32m✓\x1b[0m",
                TargetStatus::Warning => "\x1b[33m⚠\x1b[0m",
                TargetStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || target.status != TargetStatus::Ok {
                println!("  {} {}", status_icon, target.name);
            }

            for diag in &target.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if !quiet || diag.severity == Severity::Error {
                    println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    );
                }
            }
        }

        println!();
        if result.is_ok() {
            println!(
                "\x1b[32m✓ {} declarations checked, all passed\x1b[0m",
                result.checked
            );
        } else {
            println!(
                "\x1b[31m✗ {} declarations checked: {} passed, {} failed ({} errors, {} warnings)\x1b[0m",
                result.checked, result.passed, result.failed, result.errors, result.warnings
            );
        }
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(1)
    }
}
