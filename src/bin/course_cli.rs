use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use ai_tutor::{
    NextUnit, Tutor, UnitSource,
    config::Config,
    course::{Block, BlockBody, Course, Step, Tier},
    generator::{ContentGenerator, OpenAiGenerator, ScriptedGenerator},
    progress::{CompletionInput, CompletionOutcome},
    utils::init_log,
};
use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, default_value = "free")]
    tier: Tier,
    /// Generate content with the built-in scripted generator instead of an LLM
    #[arg(long)]
    offline: bool,
    /// Write logs to a daily rolling file in this directory instead of stdout
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Create a course file
    New {
        goal: String,
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short, long, default_value = "local")]
        user: String,
        /// Generate an outline of lessons and blocks
        #[arg(long)]
        outline: bool,
        /// Planned number of steps of a course without outline
        #[arg(short, long, default_value = "10")]
        lessons: usize,
    },
    Show {
        course: PathBuf,
    },
    /// Print the unit to work on, generating it if needed
    Next {
        course: PathBuf,
    },
    Complete {
        course: PathBuf,
        unit_id: String,
        #[arg(short, long)]
        score: Option<f64>,
        #[arg(short, long)]
        answer: Option<String>,
    },
    Retry {
        course: PathBuf,
        unit_id: String,
        score: f64,
    },
    Skip {
        course: PathBuf,
    },
    Archive {
        course: PathBuf,
    },
    Unarchive {
        course: PathBuf,
    },
    Delete {
        course: PathBuf,
    },
    /// Work through a course interactively
    Learn {
        course: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _guard = match init_log(args.log_dir.clone()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("{:?}", e);
            None
        }
    };
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::load(args.config.as_deref())?;
    if args.offline {
        let tutor = Tutor::new(Arc::new(ScriptedGenerator::new()), &config);
        execute(tutor, args.command, args.tier).await
    } else {
        let generator = OpenAiGenerator::from_config(&config.llm)?;
        let tutor = Tutor::new(Arc::new(generator), &config);
        execute(tutor, args.command, args.tier).await
    }
}

async fn load(path: &Path) -> anyhow::Result<Course> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading course {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing course {}", path.display()))
}

async fn save(path: &Path, course: &Course) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(course)?;
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("writing course {}", path.display()))
}

async fn execute<G: ContentGenerator>(
    tutor: Tutor<G>,
    command: Commands,
    tier: Tier,
) -> anyhow::Result<()> {
    match command {
        Commands::New {
            goal,
            out,
            user,
            outline,
            lessons,
        } => {
            let id = uuid::Uuid::new_v4().to_string();
            let mut course = if outline {
                Course::awaiting_outline(id, user, goal)
            } else {
                Course::flat(id, user, goal, lessons)
            };
            save(&out, &course).await?;
            if outline {
                let result = tutor.build_outline(&mut course, tier).await;
                save(&out, &course).await?;
                result?;
            }
            info!("created course {} at {}", course.id, out.display());
            print_course(&course);
        }
        Commands::Show { course: path } => {
            print_course(&load(&path).await?);
        }
        Commands::Next { course: path } => {
            let mut course = load(&path).await?;
            let next = tutor.next_unit(&mut course, tier).await?;
            save(&path, &course).await?;
            print_next(&next);
        }
        Commands::Complete {
            course: path,
            unit_id,
            score,
            answer,
        } => {
            let mut course = load(&path).await?;
            let input = CompletionInput {
                score,
                user_answer: answer,
            };
            let outcome = tutor.complete_unit(&mut course, &unit_id, input, tier).await?;
            save(&path, &course).await?;
            print_outcome(&outcome);
        }
        Commands::Retry {
            course: path,
            unit_id,
            score,
        } => {
            let mut course = load(&path).await?;
            let outcome = tutor.retry_unit(&mut course, &unit_id, score, tier)?;
            save(&path, &course).await?;
            print_outcome(&outcome);
        }
        Commands::Skip { course: path } => {
            let mut course = load(&path).await?;
            if tutor.skip_lesson(&mut course, tier)? {
                save(&path, &course).await?;
                println!("Lesson skipped");
            } else {
                println!("Nothing to skip");
            }
        }
        Commands::Archive { course: path } => {
            let mut course = load(&path).await?;
            tutor.archive(&mut course)?;
            save(&path, &course).await?;
            println!("Course {} archived", course.id);
        }
        Commands::Unarchive { course: path } => {
            let mut course = load(&path).await?;
            tutor.unarchive(&mut course, tier)?;
            save(&path, &course).await?;
            println!("Course {} is active again", course.id);
        }
        Commands::Delete { course: path } => {
            let mut course = load(&path).await?;
            tutor.delete(&mut course)?;
            save(&path, &course).await?;
            println!("Course {} deleted", course.id);
        }
        Commands::Learn { course: path } => {
            let mut course = load(&path).await?;
            start_learning(&tutor, &path, &mut course, tier).await?;
        }
    }
    Ok(())
}

async fn start_learning<G: ContentGenerator>(
    tutor: &Tutor<G>,
    path: &Path,
    course: &mut Course,
    tier: Tier,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Learning: {} (type \"exit\" to stop)", course.goal);
    loop {
        let next = tutor.next_unit(course, tier).await?;
        save(path, course).await?;
        let units: Vec<(String, Option<String>)> = match &next {
            NextUnit::Finished => {
                println!("\nCourse finished with progress {}%", course.progress);
                break;
            }
            NextUnit::Step { step, .. } => vec![(step.id.clone(), step.expected_answer.clone())],
            NextUnit::Lesson { blocks, .. } => blocks
                .iter()
                .filter(|b| !b.is_completed())
                .map(|b| (b.id.clone(), expected_answer(b)))
                .collect(),
        };
        print_next(&next);
        for (unit_id, expected) in units {
            println!("\n[{}] answer, or press enter to continue:", unit_id);
            let Some(input) = read_input(&mut lines).await? else {
                return Ok(());
            };
            let score = expected.map(|e| {
                if input.trim().eq_ignore_ascii_case(e.trim()) {
                    100.0
                } else {
                    0.0
                }
            });
            let input = CompletionInput {
                score,
                user_answer: (!input.is_empty()).then_some(input),
            };
            let outcome = tutor.complete_unit(course, &unit_id, input, tier).await?;
            save(path, course).await?;
            print_outcome(&outcome);
        }
    }
    Ok(())
}

async fn read_input(lines: &mut Lines<BufReader<Stdin>>) -> anyhow::Result<Option<String>> {
    let Some(line) = lines.next_line().await? else {
        return Ok(None);
    };
    let line = line.trim().to_string();
    if line == "exit" {
        return Ok(None);
    }
    Ok(Some(line))
}

fn expected_answer(block: &Block) -> Option<String> {
    match &block.body {
        BlockBody::Question { correct_answer, .. } => Some(correct_answer.clone()),
        _ => None,
    }
}

fn print_course(course: &Course) {
    println!("{:<12} {}", "id", course.id);
    println!("{:<12} {}", "goal", course.goal);
    println!("{:<12} {}", "status", course.status);
    println!("{:<12} {}", "outline", course.outline_status);
    println!(
        "{:<12} {}% ({}/{})",
        "progress", course.progress, course.lessons_completed, course.total_lessons
    );
    if let Some(outline) = course.curriculum.outline() {
        for section in &outline.sections {
            println!("\n{}", section.title);
            for lesson in &section.lessons {
                println!("  [{:?}] {}", lesson.status, lesson.title);
            }
        }
    }
    for step in course.curriculum.steps() {
        let mark = if step.completed { "x" } else { " " };
        println!("[{}] {:>3}. {} ({})", mark, step.index + 1, step.title, step.kind.as_str());
    }
}

fn source_label(source: UnitSource) -> &'static str {
    match source {
        UnitSource::Existing => "in progress",
        UnitSource::Cache => "pregenerated",
        UnitSource::Generated => "generated now",
    }
}

fn print_next(next: &NextUnit) {
    match next {
        NextUnit::Finished => println!("Nothing left to learn"),
        NextUnit::Step { step, source } => {
            println!("\n[{}]", source_label(*source));
            print_step(step);
        }
        NextUnit::Lesson {
            title,
            blocks,
            source,
            ..
        } => {
            println!("\n[{}] {}", source_label(*source), title);
            for block in blocks.iter().filter(|b| !b.is_completed()) {
                print_block(block);
            }
        }
    }
}

fn print_step(step: &Step) {
    println!("## {} ({}, {})", step.title, step.kind.as_str(), step.id);
    if !step.content.is_empty() {
        println!("\n{}", step.content);
    }
    if let Some(question) = &step.question {
        println!("\n{}", question);
        for (i, option) in step.options.iter().enumerate() {
            println!("  {}. {}", i + 1, option);
        }
    }
    if let Some(task) = &step.task {
        println!("\nTask: {}", task);
    }
    for hint in &step.hints {
        println!("  hint: {}", hint);
    }
}

fn print_block(block: &Block) {
    println!("\n### {} ({}, {})", block.title, block.kind().as_str(), block.id);
    match &block.body {
        BlockBody::Text { markdown } => println!("{}", markdown),
        BlockBody::Code {
            language,
            code,
            explanation,
        } => {
            println!("```{}\n{}\n```", language, code);
            if let Some(explanation) = explanation {
                println!("{}", explanation);
            }
        }
        BlockBody::Question { text, options, .. } => {
            println!("{}", text);
            for (i, option) in options.iter().enumerate() {
                println!("  {}. {}", i + 1, option);
            }
        }
        BlockBody::Task {
            instruction, hints, ..
        } => {
            println!("{}", instruction);
            for hint in hints {
                println!("  hint: {}", hint);
            }
        }
        BlockBody::Flashcard { front, back } => println!("{}\n---\n{}", front, back),
        BlockBody::Summary { key_points } => {
            for point in key_points {
                println!("- {}", point);
            }
        }
    }
}

fn print_outcome(outcome: &CompletionOutcome) {
    println!(
        "{:?}: progress {}% ({}/{})",
        outcome.kind, outcome.progress, outcome.lessons_completed, outcome.total_lessons
    );
    if outcome.course_completed {
        println!("Course completed!");
    }
}
