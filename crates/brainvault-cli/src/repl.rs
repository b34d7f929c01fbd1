//! REPL: the interactive `brainvault>` shell.
//!
//! Supported slash-commands:
//!   /remember <category> <key> <value> [importance] [confidence]
//!   /recall <category> <key>     /forget <category> <key>
//!   /contradict <category> <key>
//!   /context <query> [n]
//!   /mistake <type> | <context> [| <solution>]     /learned <id> <solution>
//!   /skill <name> ok|fail        /skills
//!   /topic <name>                /topics
//!   /patterns  /stats  /consolidate  /help  /quit

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use brainvault_memory::{
    Brain, Budget, CancelFlag, ConsolidationScheduler, ConsolidationSummary, MemoryError,
    MistakeTransition,
};
use brainvault_types::{Confidence, Importance, RecordId, value_text};

const REMEMBER_USAGE: &str = "/remember <category> <key> <value> [importance] [confidence]";
const MISTAKE_USAGE: &str = "/mistake <type> | <context> [| <solution>]";

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Remember {
        category: String,
        key: String,
        value: Value,
        importance: i64,
        confidence: f64,
    },
    Recall {
        category: String,
        key: String,
    },
    Forget {
        category: String,
        key: String,
    },
    Contradict {
        category: String,
        key: String,
    },
    Context {
        query: String,
        limit: Option<usize>,
    },
    Mistake {
        mistake_type: String,
        context: String,
        solution: Option<String>,
    },
    Learned {
        id: RecordId,
        solution: String,
    },
    Skill {
        name: String,
        success: bool,
    },
    Skills,
    Topic {
        name: String,
    },
    Topics,
    Patterns,
    Stats,
    Consolidate,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid {what}: '{value}'")]
    Invalid { what: &'static str, value: String },
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let words: Vec<&str> = rest.split_whitespace().collect();

        match name {
            "/remember" => parse_remember(&words),
            "/recall" => {
                let (category, key) = category_and_key(&words, "/recall <category> <key>")?;
                Ok(Command::Recall { category, key })
            }
            "/forget" => {
                let (category, key) = category_and_key(&words, "/forget <category> <key>")?;
                Ok(Command::Forget { category, key })
            }
            "/contradict" => {
                let (category, key) = category_and_key(&words, "/contradict <category> <key>")?;
                Ok(Command::Contradict { category, key })
            }
            "/context" => parse_context(&words),
            "/mistake" => parse_mistake(rest),
            "/learned" => {
                let [id, solution @ ..] = words.as_slice() else {
                    return Err(ParseError::Usage("/learned <id> <solution>"));
                };
                if solution.is_empty() {
                    return Err(ParseError::Usage("/learned <id> <solution>"));
                }
                let id = id.parse::<i64>().map_err(|_| ParseError::Invalid {
                    what: "mistake id",
                    value: id.to_string(),
                })?;
                Ok(Command::Learned {
                    id: RecordId(id),
                    solution: solution.join(" "),
                })
            }
            "/skill" => {
                let [name @ .., outcome] = words.as_slice() else {
                    return Err(ParseError::Usage("/skill <name> ok|fail"));
                };
                if name.is_empty() {
                    return Err(ParseError::Usage("/skill <name> ok|fail"));
                }
                let success = match *outcome {
                    "ok" | "success" => true,
                    "fail" | "failure" => false,
                    other => {
                        return Err(ParseError::Invalid {
                            what: "outcome",
                            value: other.to_string(),
                        });
                    }
                };
                Ok(Command::Skill {
                    name: name.join(" "),
                    success,
                })
            }
            "/topic" if !rest.is_empty() => Ok(Command::Topic {
                name: rest.to_string(),
            }),
            "/topic" => Err(ParseError::Usage("/topic <name>")),
            "/skills" => Ok(Command::Skills),
            "/topics" => Ok(Command::Topics),
            "/patterns" => Ok(Command::Patterns),
            "/stats" => Ok(Command::Stats),
            "/consolidate" => Ok(Command::Consolidate),
            "/help" => Ok(Command::Help),
            "/quit" | "/exit" => Ok(Command::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn category_and_key(words: &[&str], usage: &'static str) -> Result<(String, String), ParseError> {
    match words {
        [category, key @ ..] if !key.is_empty() => Ok((category.to_string(), key.join(" "))),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn parse_remember(words: &[&str]) -> Result<Command, ParseError> {
    let [category, key, rest @ ..] = words else {
        return Err(ParseError::Usage(REMEMBER_USAGE));
    };
    if rest.is_empty() {
        return Err(ParseError::Usage(REMEMBER_USAGE));
    }
    let (value_words, importance, confidence) = split_scores(rest);
    Ok(Command::Remember {
        category: category.to_string(),
        key: key.to_string(),
        value: parse_value(&value_words.join(" ")),
        importance: importance.unwrap_or_else(|| i64::from(Importance::DEFAULT.get())),
        confidence: confidence.unwrap_or(Confidence::CERTAIN.get()),
    })
}

/// Trailing numbers are peeled off as importance and confidence only when
/// something is left over for the value.
fn split_scores<'a, 'b>(words: &'a [&'b str]) -> (&'a [&'b str], Option<i64>, Option<f64>) {
    if let [head @ .., importance, confidence] = words
        && !head.is_empty()
        && let (Ok(importance), Ok(confidence)) = (importance.parse(), confidence.parse())
    {
        return (head, Some(importance), Some(confidence));
    }
    if let [head @ .., importance] = words
        && !head.is_empty()
        && let Ok(importance) = importance.parse()
    {
        return (head, Some(importance), None);
    }
    (words, None, None)
}

/// JSON literals are stored as such; anything else is plain text.
fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn parse_context(words: &[&str]) -> Result<Command, ParseError> {
    match words {
        [] => Err(ParseError::Usage("/context <query> [n]")),
        [query @ .., n] if !query.is_empty() && n.parse::<usize>().is_ok() => Ok(Command::Context {
            query: query.join(" "),
            limit: n.parse().ok(),
        }),
        _ => Ok(Command::Context {
            query: words.join(" "),
            limit: None,
        }),
    }
}

fn parse_mistake(rest: &str) -> Result<Command, ParseError> {
    let parts: Vec<&str> = rest.split('|').map(str::trim).collect();
    match parts.as_slice() {
        [mistake_type, context] => Ok(Command::Mistake {
            mistake_type: mistake_type.to_string(),
            context: context.to_string(),
            solution: None,
        }),
        [mistake_type, context, solution] => Ok(Command::Mistake {
            mistake_type: mistake_type.to_string(),
            context: context.to_string(),
            solution: Some(solution.to_string()).filter(|s| !s.is_empty()),
        }),
        _ => Err(ParseError::Usage(MISTAKE_USAGE)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

enum Flow {
    Continue,
    Quit,
}

/// Entry point for the interactive REPL.  Runs scheduled consolidation
/// between commands; Ctrl-C at the prompt or `/quit` leaves the loop.
pub fn run(brain: &Brain, cancel: &CancelFlag, history: &Path) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    if editor.load_history(history).is_err() {
        debug!(path = %history.display(), "no REPL history yet");
    }

    let mut scheduler = ConsolidationScheduler::from_policy(&brain.config().consolidation);

    loop {
        run_scheduled(brain, cancel, &mut scheduler);

        let line = match editor.readline(&format!("{} ", "brainvault>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        let command = match Command::parse(input) {
            Ok(command) => command,
            Err(ParseError::Unknown(name)) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    name.yellow(),
                    "/help".bold()
                );
                continue;
            }
            Err(e) => {
                println!("{}", e.to_string().yellow());
                continue;
            }
        };

        match execute(brain, cancel, command) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Err(e) => report_error(&e),
        }
    }

    if let Err(e) = editor.save_history(history) {
        warn!(error = %e, path = %history.display(), "failed to save REPL history");
    }
}

fn run_scheduled(brain: &Brain, cancel: &CancelFlag, scheduler: &mut ConsolidationScheduler) {
    cancel.reset();
    match scheduler.run_if_due(brain, cancel) {
        Ok(Some(summary)) if !summary.is_noop() => {
            println!("  {} {}", "Scheduled consolidation:".dimmed(), summary);
        }
        Ok(_) => {}
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &MemoryError) {
    if e.is_recoverable() {
        println!("{}", e.to_string().yellow());
    } else {
        println!("{}: {}", "Error".red().bold(), e);
    }
}

fn execute(brain: &Brain, cancel: &CancelFlag, command: Command) -> Result<Flow, MemoryError> {
    match command {
        Command::Remember {
            category,
            key,
            value,
            importance,
            confidence,
        } => {
            let id = brain.store_knowledge(&category, &key, value, importance, confidence)?;
            println!("{} {}/{} (#{})", "✓ Remembered".green(), category, key.bold(), id);
        }
        Command::Recall { category, key } => match brain.recall_or_unknown(&category, &key)?.known() {
            Some(value) => println!("  {} = {}", key.bold(), value_text(&value)),
            None => println!("  {}", "(unknown)".dimmed()),
        },
        Command::Forget { category, key } => {
            brain.forget_knowledge(&category, &key)?;
            println!("{} {}/{}", "✓ Forgot".green(), category, key.bold());
        }
        Command::Contradict { category, key } => {
            let confidence = brain.contradict_knowledge(&category, &key)?;
            println!("  {} confidence now {:.3}", key.bold(), confidence);
        }
        Command::Context { query, limit } => {
            let budget = limit.map_or_else(|| brain.default_budget(), Budget::records);
            print_context(brain, &query, budget)?;
        }
        Command::Mistake {
            mistake_type,
            context,
            solution,
        } => {
            let id = brain.record_mistake(&mistake_type, &context, solution.as_deref())?;
            println!("{} mistake #{}", "✓ Recorded".green(), id);
        }
        Command::Learned { id, solution } => match brain.mark_learned(id, &solution)? {
            MistakeTransition::Learned => println!("{} mistake #{} as learned", "✓ Marked".green(), id),
            MistakeTransition::AlreadyLearned => {
                println!("  mistake #{} was {}", id, "already learned".dimmed())
            }
        },
        Command::Skill { name, success } => {
            let proficiency = brain.record_skill_usage(&name, success)?;
            println!("  {} proficiency {:.3}", name.bold(), proficiency);
        }
        Command::Skills => {
            let skills = brain.get_skills()?;
            println!("{}", "Skills".bold().underline());
            if skills.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for (name, proficiency) in &skills {
                println!("  {:<24} {:.3}", name, proficiency);
            }
        }
        Command::Topic { name } => {
            let topic = brain.record_topic(&name)?;
            println!(
                "  {} interest {:.2}",
                topic.topic_name.bold(),
                topic.interest_level()
            );
        }
        Command::Topics => {
            let topics = brain.get_topics()?;
            println!("{}", "Topics".bold().underline());
            if topics.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for topic in &topics {
                println!(
                    "  {:<24} frequency {:>7.2}  interest {:.2}",
                    topic.topic_name,
                    topic.frequency,
                    topic.interest_level()
                );
            }
        }
        Command::Patterns => {
            let patterns = brain.get_patterns()?;
            println!("{}", "Patterns".bold().underline());
            if patterns.is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for pattern in &patterns {
                println!(
                    "  {:<16} {}  seen {}  success {:.0}%",
                    pattern.pattern_type,
                    value_text(&pattern.pattern_data).dimmed(),
                    pattern.frequency,
                    pattern.success_rate() * 100.0
                );
            }
        }
        Command::Stats => {
            let stats = brain.get_memory_stats()?;
            println!("{}", "Memory".bold().underline());
            for (category, count) in &stats.active {
                println!("  {:<14} {:>8}", category.to_string(), count);
            }
            println!("  {:<14} {:>8}", "total".bold(), stats.total_active());
            println!(
                "  {} conversations {}, patterns {}",
                "archived".dimmed(),
                stats.archived_conversations,
                stats.archived_patterns
            );
            println!(
                "  {} {}, {} {}",
                "relations".dimmed(),
                stats.relations,
                "indexed terms".dimmed(),
                stats.indexed_terms
            );
        }
        Command::Consolidate => {
            cancel.reset();
            println!("  Consolidating … {}", "(Ctrl-C to interrupt)".dimmed());
            match brain.consolidate_with(cancel) {
                Ok(summary) => print_summary(&summary),
                Err(MemoryError::ConsolidationInterrupted { step, partial }) => {
                    println!(
                        "{} during {}; kept: {}",
                        "⚠  Interrupted".yellow().bold(),
                        step,
                        partial
                    );
                    println!("  Run {} again to finish.", "/consolidate".bold());
                }
                Err(e) => return Err(e),
            }
        }
        Command::Help => print_help(),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_context(brain: &Brain, query: &str, budget: Budget) -> Result<(), MemoryError> {
    let window = brain.get_context(query, budget)?;
    if window.is_empty() {
        println!("  {}", "(nothing relevant)".dimmed());
    }
    for (rank, entry) in window.entries.iter().enumerate() {
        let marker = if entry.boosted { "★" } else { " " };
        println!(
            "  {:>2}. {} {} {}",
            rank + 1,
            marker.yellow(),
            entry.title.bold(),
            format!("[{} w={:.2}]", entry.record, entry.weight).dimmed()
        );
        println!("       {}", entry.body);
    }
    if window.partial {
        println!("  {}", "(deadline reached; results are partial)".yellow());
    }
    Ok(())
}

fn print_summary(summary: &ConsolidationSummary) {
    if summary.is_noop() {
        println!("{} nothing to do", "✓ Consolidated:".green());
    } else {
        println!("{} {}", "✓ Consolidated:".green(), summary);
    }
}

fn print_help() {
    println!();
    println!("{}", "BrainVault Commands".bold().underline());
    let rows = [
        (REMEMBER_USAGE, "store or update a fact"),
        ("/recall <category> <key>", "look a fact up"),
        ("/forget <category> <key>", "delete a fact"),
        ("/contradict <category> <key>", "lower confidence in a fact"),
        ("/context <query> [n]", "ranked records for a category or text"),
        (MISTAKE_USAGE, "record a mistake"),
        ("/learned <id> <solution>", "mark a mistake as learned"),
        ("/skill <name> ok|fail", "record a skill outcome"),
        ("/skills", "list skill proficiencies"),
        ("/topic <name>", "note a mention of a topic"),
        ("/topics", "list topics by frequency"),
        ("/patterns", "list observed patterns"),
        ("/stats", "record counts per category"),
        ("/consolidate", "archive, strengthen, decay, dedupe, reindex"),
        ("/quit  /exit", "exit the shell"),
    ];
    for (usage, about) in rows {
        println!("  {:<58} {}", usage.cyan(), about);
    }
    println!();
}
