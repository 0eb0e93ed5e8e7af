use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "token-usage",
    about = "Aggregate gateway request logs into token usage per subscription, user, and model"
)]
struct Cli {
    /// Exported request log CSV.
    #[arg(long, alias = "input_file")]
    input_file: PathBuf,
    /// Destination CSV for the aggregated usage.
    #[arg(long, alias = "output_file")]
    output_file: PathBuf,
    /// Request URL to keep; other endpoints are ignored.
    #[arg(long)]
    endpoint: String,
}

/// Columns read from the request log export.
#[derive(Debug, Deserialize)]
struct LogRow {
    #[serde(rename = "Url", default)]
    url: String,
    #[serde(rename = "ResponseCode", default)]
    response_code: String,
    #[serde(rename = "ResponseBody", default)]
    response_body: String,
    #[serde(rename = "TraceRecords", default)]
    trace_records: String,
    #[serde(rename = "ApimSubscriptionId", default)]
    subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct UsageRow {
    #[serde(rename = "ApimSubscriptionId")]
    subscription_id: String,
    preferred_username: String,
    model_name: String,
    completion_tokens: u64,
    prompt_tokens: u64,
    api_call_count: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    completion_tokens: u64,
    prompt_tokens: u64,
    calls: u64,
}

/// Token counts and model reported in a completion response body.
#[derive(Debug, PartialEq, Eq)]
struct Usage {
    completion_tokens: u64,
    prompt_tokens: u64,
    model: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let input = File::open(&cli.input_file)
        .with_context(|| format!("Failed to open {}", cli.input_file.display()))?;
    let rows = aggregate(input, &cli.endpoint)?;
    let output = File::create(&cli.output_file)
        .with_context(|| format!("Failed to create {}", cli.output_file.display()))?;
    write_rows(output, &rows)?;
    println!(
        "Wrote {} usage rows to {}",
        rows.len(),
        cli.output_file.display()
    );
    Ok(())
}

fn aggregate<R: Read>(input: R, endpoint: &str) -> Result<Vec<UsageRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let mut groups: BTreeMap<(String, String, String), Totals> = BTreeMap::new();

    for record in reader.deserialize::<LogRow>() {
        let row = record.context("Failed to parse log row")?;
        if row.url != endpoint || row.response_code.trim() != "200" {
            continue;
        }
        let (Some(usage), Some(username)) = (
            parse_usage(&row.response_body),
            parse_username(&row.trace_records),
        ) else {
            continue;
        };
        let totals = groups
            .entry((row.subscription_id, username, usage.model))
            .or_default();
        totals.completion_tokens += usage.completion_tokens;
        totals.prompt_tokens += usage.prompt_tokens;
        totals.calls += 1;
    }

    Ok(groups
        .into_iter()
        .map(|((subscription_id, preferred_username, model_name), totals)| UsageRow {
            subscription_id,
            preferred_username,
            model_name,
            completion_tokens: totals.completion_tokens,
            prompt_tokens: totals.prompt_tokens,
            api_call_count: totals.calls,
        })
        .collect())
}

fn parse_usage(body: &str) -> Option<Usage> {
    let json: Value = serde_json::from_str(body).ok()?;
    let usage = json.get("usage")?;
    Some(Usage {
        completion_tokens: usage.get("completion_tokens")?.as_u64()?,
        prompt_tokens: usage.get("prompt_tokens")?.as_u64()?,
        model: json.get("model")?.as_str()?.to_string(),
    })
}

fn parse_username(trace_records: &str) -> Option<String> {
    let json: Value = serde_json::from_str(trace_records).ok()?;
    json.get(0)?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn write_rows<W: Write>(output: W, rows: &[UsageRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    if rows.is_empty() {
        writer.write_record([
            "ApimSubscriptionId",
            "preferred_username",
            "model_name",
            "completion_tokens",
            "prompt_tokens",
            "api_call_count",
        ])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "https://apim.example.net/openai/deployments/chat/chat/completions";

    fn log_csv() -> String {
        let body = |completion: u64, prompt: u64, model: &str| {
            format!(
                r#""{{""usage"":{{""completion_tokens"":{completion},""prompt_tokens"":{prompt}}},""model"":""{model}""}}""#
            )
        };
        let trace = |user: &str| format!(r#""[{{""message"":""{user}""}}]""#);
        [
            "Url,ResponseCode,ResponseBody,TraceRecords,ApimSubscriptionId".to_string(),
            format!("{ENDPOINT},200,{},{},sub-a", body(10, 100, "gpt-35-turbo"), trace("kim@example.com")),
            format!("{ENDPOINT},200,{},{},sub-a", body(5, 50, "gpt-35-turbo"), trace("kim@example.com")),
            format!("{ENDPOINT},200,{},{},sub-b", body(7, 70, "gpt-4"), trace("lee@example.com")),
            format!("{ENDPOINT},429,{},{},sub-a", body(1, 1, "gpt-35-turbo"), trace("kim@example.com")),
            format!("https://other.example.net,200,{},{},sub-a", body(1, 1, "gpt-4"), trace("kim@example.com")),
            format!("{ENDPOINT},200,not json,{},sub-c", trace("choi@example.com")),
            format!("{ENDPOINT},200,{},[],sub-d", body(3, 30, "gpt-4")),
        ]
        .join("\n")
    }

    #[test]
    fn groups_successful_calls_to_the_endpoint() {
        let rows = aggregate(log_csv().as_bytes(), ENDPOINT).expect("rows");

        assert_eq!(
            rows,
            vec![
                UsageRow {
                    subscription_id: "sub-a".into(),
                    preferred_username: "kim@example.com".into(),
                    model_name: "gpt-35-turbo".into(),
                    completion_tokens: 15,
                    prompt_tokens: 150,
                    api_call_count: 2,
                },
                UsageRow {
                    subscription_id: "sub-b".into(),
                    preferred_username: "lee@example.com".into(),
                    model_name: "gpt-4".into(),
                    completion_tokens: 7,
                    prompt_tokens: 70,
                    api_call_count: 1,
                },
            ]
        );
    }

    #[test]
    fn output_has_the_expected_header() {
        let rows = aggregate(log_csv().as_bytes(), ENDPOINT).expect("rows");
        let mut output = Vec::new();
        write_rows(&mut output, &rows).expect("write");
        let text = String::from_utf8(output).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("ApimSubscriptionId,preferred_username,model_name,completion_tokens,prompt_tokens,api_call_count")
        );
        assert_eq!(lines.next(), Some("sub-a,kim@example.com,gpt-35-turbo,15,150,2"));
    }

    #[test]
    fn rows_without_usage_or_username_are_dropped() {
        let rows = aggregate(log_csv().as_bytes(), ENDPOINT).expect("rows");
        assert!(
            rows.iter()
                .all(|row| row.subscription_id != "sub-c" && row.subscription_id != "sub-d")
        );
        assert!(rows.iter().all(|row| !row.preferred_username.is_empty()));
    }

    #[test]
    fn usage_requires_all_fields() {
        assert_eq!(parse_usage(r#"{"usage":{"completion_tokens":1}}"#), None);
        assert_eq!(parse_username("[]"), None);
        assert_eq!(
            parse_username(r#"[{"message":"park@example.com"},{"message":"other"}]"#).as_deref(),
            Some("park@example.com")
        );
    }
}
