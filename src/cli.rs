use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate the paragraphs of a text file
    Translate {
        /// Input text file, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target language code (defaults to the configured one)
        #[arg(short, long)]
        target_lang: Option<String>,

        /// Source language code
        #[arg(short, long)]
        source_lang: Option<String>,

        /// Apply the settings override of this site
        #[arg(short, long)]
        domain: Option<String>,

        /// Write the JSON event stream instead of the translated document
        #[arg(long)]
        events: bool,
    },

    /// Serve the JSON-lines message API on stdin/stdout
    Serve,

    /// Check whether ollama is reachable
    Check,

    /// List the models installed in ollama
    Models,

    /// List supported target languages
    Languages,

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the settings in effect
    Show {
        /// Site to resolve overrides for
        #[arg(short, long)]
        domain: Option<String>,
    },

    /// Change global settings
    Set {
        #[arg(long)]
        target_lang: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        /// System prompt; an empty string restores the default
        #[arg(long)]
        custom_prompt: Option<String>,

        #[arg(long)]
        ollama_url: Option<String>,
    },

    /// Create or change a site override
    Site {
        domain: String,

        /// Translate this site automatically
        #[arg(long)]
        auto_translate: Option<bool>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        target_lang: Option<String>,
    },

    /// Delete a site override
    RemoveSite { domain: String },
}
