use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.attendkiosk.Kiosk1",
    default_service = "org.attendkiosk.Kiosk1",
    default_path = "/org/attendkiosk/Kiosk1"
)]
trait Kiosk {
    async fn list_students(&self) -> zbus::Result<String>;
    async fn search(&self, field: &str, term: &str) -> zbus::Result<String>;
    async fn select_student(&self, id: i64) -> zbus::Result<bool>;
    async fn set_field(&self, field: &str, value: &str) -> zbus::Result<()>;
    async fn form(&self) -> zbus::Result<String>;
    async fn reset_form(&self) -> zbus::Result<()>;
    async fn clear_selection(&self) -> zbus::Result<()>;
    async fn add_student(&self) -> zbus::Result<String>;
    async fn update_student(&self, id: i64) -> zbus::Result<String>;
    async fn delete_student(&self, id: i64) -> zbus::Result<String>;
    async fn open_camera(&self, flow: &str) -> zbus::Result<u64>;
    async fn capture_photo(&self, handle: u64) -> zbus::Result<String>;
    async fn close_camera(&self, handle: u64) -> zbus::Result<()>;
    async fn mark_attendance(&self) -> zbus::Result<String>;
    async fn attendance(&self) -> zbus::Result<String>;
    async fn export_csv(&self, path: &str) -> zbus::Result<u64>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "kiosk", about = "Attendance kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List students, optionally filtered by one field
    Students {
        /// Field to search (e.g. "name", "roll_no", "department")
        #[arg(short, long, requires = "term")]
        field: Option<String>,
        /// Case-insensitive substring to look for
        #[arg(short, long, requires = "field")]
        term: Option<String>,
    },
    /// Load a student into the form for editing
    Select { id: i64 },
    /// Set one form field
    Set { field: String, value: String },
    /// Show the current form
    Form,
    /// Clear the form, the captured photo and the selection
    Reset,
    /// Stop editing the selected student and start a new record
    Deselect,
    /// Create a student from the form
    Add,
    /// Save the form over the selected student
    Update { id: i64 },
    /// Delete the selected student
    Delete { id: i64 },
    /// Capture an enrollment photo into the form
    Photo,
    /// Capture a face and mark attendance
    Mark,
    /// Show today's attendance
    Attendance,
    /// Download the attendance CSV export
    Export { path: PathBuf },
    /// Show daemon status
    Status,
}

fn text<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

/// The daemon writes the file from its own working directory, so relative
/// paths are resolved here.
fn export_target(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("failed to resolve the current directory")?;
    Ok(cwd.join(path))
}

fn print_students(raw: &str) -> Result<()> {
    let students: Vec<Value> = serde_json::from_str(raw)?;
    if students.is_empty() {
        println!("No students");
        return Ok(());
    }
    println!("{:>5}  {:<12} {:<24} {:<16} {}", "ID", "ROLL NO", "NAME", "DEPARTMENT", "PHONE");
    for s in &students {
        println!(
            "{:>5}  {:<12} {:<24} {:<16} {}",
            s["student_id"].as_i64().unwrap_or_default(),
            text(s, "roll_no"),
            text(s, "name"),
            text(s, "department"),
            text(s, "phone"),
        );
    }
    println!("{} student(s)", students.len());
    Ok(())
}

fn print_message(raw: &str) -> Result<()> {
    let v: Value = serde_json::from_str(raw)?;
    let message = text(&v, "message");
    println!("{}", if message.is_empty() { "OK" } else { message });
    if let Some(id) = v.get("student_id").and_then(Value::as_i64) {
        println!("  student_id: {id}");
    }
    if let Some(url) = v.get("photo_url").and_then(Value::as_str) {
        println!("  photo: {url}");
    }
    if v["reloaded"].as_bool() == Some(false) {
        println!("  warning: student list could not be refreshed");
    }
    Ok(())
}

fn print_form(raw: &str) -> Result<()> {
    let v: Value = serde_json::from_str(raw)?;
    match v["selected"].as_i64() {
        Some(id) => println!("Editing student {id}"),
        None => println!("New student"),
    }
    if let Some(fields) = v["fields"].as_object() {
        for (name, value) in fields {
            println!("  {name:<15} {}", value.as_str().unwrap_or(""));
        }
    }
    let photo = if v["has_photo"].as_bool() == Some(true) { "captured" } else { "none" };
    println!("  {:<15} {photo}", "photo");
    Ok(())
}

fn print_mark(raw: &str) -> Result<()> {
    let v: Value = serde_json::from_str(raw)?;
    let matched = v["matched"].as_array().cloned().unwrap_or_default();
    if matched.is_empty() {
        let message = text(&v, "message");
        println!("{}", if message.is_empty() { "No match" } else { message });
        return Ok(());
    }
    for m in &matched {
        match m["score"].as_f64() {
            Some(s) => println!(
                "Marked present: {} ({}) score {s:.2}",
                text(m, "name"),
                text(m, "roll_no")
            ),
            None => println!("Marked present: {} ({})", text(m, "name"), text(m, "roll_no")),
        }
    }
    if v["liveness_checked"].as_bool() == Some(true) {
        println!("  liveness: checked");
    }
    if v["ledger_reloaded"].as_bool() == Some(false) {
        println!("  warning: attendance list could not be refreshed");
    }
    Ok(())
}

fn print_attendance(raw: &str) -> Result<()> {
    let rows: Vec<Value> = serde_json::from_str(raw)?;
    if rows.is_empty() {
        println!("No attendance recorded today");
        return Ok(());
    }
    println!("{:<12} {:<24} {:<10} {:<8} {}", "ROLL NO", "NAME", "DATE", "TIME", "STATUS");
    for r in &rows {
        println!(
            "{:<12} {:<24} {:<10} {:<8} {}",
            text(r, "roll_no"),
            text(r, "name"),
            text(r, "date"),
            text(r, "time_in"),
            text(r, "status"),
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let kiosk = KioskProxy::new(&conn)
        .await
        .context("kioskd is not reachable")?;

    match cli.command {
        Commands::Students { field, term } => {
            let raw = match (field, term) {
                (Some(field), Some(term)) => {
                    kiosk.list_students().await?;
                    kiosk.search(&field, &term).await?
                }
                _ => kiosk.list_students().await?,
            };
            print_students(&raw)?;
        }
        Commands::Select { id } => {
            if !kiosk.select_student(id).await? {
                anyhow::bail!("student {id} is not in the roster");
            }
            print_form(&kiosk.form().await?)?;
        }
        Commands::Set { field, value } => {
            kiosk.set_field(&field, &value).await?;
        }
        Commands::Form => print_form(&kiosk.form().await?)?,
        Commands::Reset => {
            kiosk.reset_form().await?;
            println!("Form cleared");
        }
        Commands::Deselect => {
            kiosk.clear_selection().await?;
            print_form(&kiosk.form().await?)?;
        }
        Commands::Add => print_message(&kiosk.add_student().await?)?,
        Commands::Update { id } => print_message(&kiosk.update_student(id).await?)?,
        Commands::Delete { id } => print_message(&kiosk.delete_student(id).await?)?,
        Commands::Photo => {
            let handle = kiosk.open_camera("enrollment").await?;
            match kiosk.capture_photo(handle).await {
                Ok(raw) => {
                    let v: Value = serde_json::from_str(&raw)?;
                    println!("Photo captured ({}x{})", v["width"], v["height"]);
                }
                Err(e) => {
                    kiosk.close_camera(handle).await?;
                    return Err(e.into());
                }
            }
        }
        Commands::Mark => {
            println!("Look at the camera...");
            print_mark(&kiosk.mark_attendance().await?)?;
        }
        Commands::Attendance => print_attendance(&kiosk.attendance().await?)?,
        Commands::Export { path } => {
            let path = export_target(path)?;
            let bytes = kiosk.export_csv(&path.to_string_lossy()).await?;
            println!("Wrote {bytes} bytes to {}", path.display());
        }
        Commands::Status => {
            let v: Value = serde_json::from_str(&kiosk.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
    }

    Ok(())
}
