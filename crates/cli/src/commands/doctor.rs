use std::path::Path;

use cleanq_core::config::{AppConfig, LlmProvider, LoadOptions};
use cleanq_db::{CsvQueueStore, QueueStore};
use serde::Serialize;

use crate::commands::block_on;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_backend(&config));
            checks.push(check_queue_readability(&config));
            checks.push(check_response_log(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_backend", "queue_readability", "response_log"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Reports the backend target only; the backend itself is not called.
fn check_llm_backend(config: &AppConfig) -> DoctorCheck {
    let target = match config.llm.provider {
        LlmProvider::Ollama => {
            format!("ollama at `{}`", config.llm.base_url.as_deref().unwrap_or("<unset>"))
        }
        LlmProvider::OpenAi => format!(
            "openai-compatible at `{}`",
            config.llm.base_url.as_deref().unwrap_or("https://api.openai.com/v1")
        ),
    };
    DoctorCheck {
        name: "llm_backend",
        status: CheckStatus::Pass,
        details: format!("{target} with model `{}`", config.llm.model),
    }
}

fn check_queue_readability(config: &AppConfig) -> DoctorCheck {
    let store = CsvQueueStore::new(&config.queue.path);
    let exists = match block_on("doctor", store.exists()) {
        Ok(Ok(exists)) => exists,
        Ok(Err(error)) => {
            return DoctorCheck {
                name: "queue_readability",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
        Err(_) => {
            return DoctorCheck {
                name: "queue_readability",
                status: CheckStatus::Fail,
                details: "failed to initialize async runtime".to_string(),
            };
        }
    };

    if !exists {
        return DoctorCheck {
            name: "queue_readability",
            status: CheckStatus::Pass,
            details: format!(
                "`{}` does not exist yet; it is created on first start or `cleanq init`",
                config.queue.path.display()
            ),
        };
    }

    match block_on("doctor", store.all()) {
        Ok(Ok(entries)) => DoctorCheck {
            name: "queue_readability",
            status: CheckStatus::Pass,
            details: format!(
                "`{}` readable with {} request(s)",
                config.queue.path.display(),
                entries.len()
            ),
        },
        Ok(Err(error)) => DoctorCheck {
            name: "queue_readability",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
        Err(_) => DoctorCheck {
            name: "queue_readability",
            status: CheckStatus::Fail,
            details: "failed to initialize async runtime".to_string(),
        },
    }
}

fn check_response_log(config: &AppConfig) -> DoctorCheck {
    let Some(path) = &config.queue.response_log_path else {
        return DoctorCheck {
            name: "response_log",
            status: CheckStatus::Pass,
            details: "response log disabled".to_string(),
        };
    };

    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    let directory = parent.unwrap_or_else(|| Path::new("."));
    if directory.is_dir() {
        DoctorCheck {
            name: "response_log",
            status: CheckStatus::Pass,
            details: format!("appending to `{}`", path.display()),
        }
    } else {
        DoctorCheck {
            name: "response_log",
            status: CheckStatus::Fail,
            details: format!("directory `{}` does not exist", directory.display()),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
