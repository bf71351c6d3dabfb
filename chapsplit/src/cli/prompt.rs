//! Interactive prompts.
//!
//! Every prompt is a blocking "ask for X" call that yields `Some(X)`, or
//! `None` when the user backs out with escape or Ctrl-C.

use anyhow::Result;
use chapsplit::domain::TargetLoudness;
use chapsplit::source::validate_url;
use inquire::list_option::ListOption;
use inquire::validator::Validation;
use inquire::{Confirm, InquireError, MultiSelect, Select, Text};

const PAGE_SIZE: usize = 15;

fn answer<T>(result: std::result::Result<T, InquireError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// What the top-level menu offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Extract,
    Normalize,
    Quit,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Extract => "Extract chapters from a YouTube URL",
            Self::Normalize => "Normalize a directory of MP3 files",
            Self::Quit => "Quit",
        };
        f.write_str(label)
    }
}

pub fn mode() -> Result<Option<Mode>> {
    answer(Select::new("What would you like to do?", vec![Mode::Extract, Mode::Normalize, Mode::Quit]).prompt())
}

pub fn url() -> Result<Option<String>> {
    answer(
        Text::new("YouTube URL:")
            .with_validator(|input: &str| {
                Ok(match validate_url(input) {
                    Ok(_) => Validation::Valid,
                    Err(e) => Validation::Invalid(validation_message(&e).into()),
                })
            })
            .prompt()
            .map(|s| s.trim().to_string()),
    )
}

pub fn directory() -> Result<Option<String>> {
    answer(
        Text::new("Directory with MP3 files:")
            .with_help_message("Leading and trailing spaces are ignored")
            .prompt(),
    )
}

/// Pick a subset of `labels`; everything starts selected. Returns indices.
pub fn select_many(message: &str, labels: Vec<String>, noun: &'static str) -> Result<Option<Vec<usize>>> {
    let selected = answer(
        MultiSelect::new(message, labels)
            .with_all_selected_by_default()
            .with_page_size(PAGE_SIZE)
            .with_validator(move |chosen: &[ListOption<&String>]| {
                Ok(if chosen.is_empty() {
                    Validation::Invalid(format!("Please select at least one {noun}.").into())
                } else {
                    Validation::Valid
                })
            })
            .raw_prompt(),
    )?;
    Ok(selected.map(|options| options.into_iter().map(|o| o.index).collect()))
}

pub fn confirm(message: &str, default: bool) -> Result<Option<bool>> {
    answer(Confirm::new(message).with_default(default).prompt())
}

/// How track metadata should be edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Keep,
    Individual,
    Bulk,
}

impl std::fmt::Display for EditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Keep => "Use chapter titles as they are",
            Self::Individual => "Edit each track",
            Self::Bulk => "Set the same tags on every track",
        };
        f.write_str(label)
    }
}

pub fn edit_mode() -> Result<Option<EditMode>> {
    answer(
        Select::new(
            "Track names and tags:",
            vec![EditMode::Keep, EditMode::Individual, EditMode::Bulk],
        )
        .prompt(),
    )
}

/// Free text with a prefilled default; blank input is allowed.
pub fn text(message: &str, default: &str) -> Result<Option<String>> {
    answer(Text::new(message).with_initial_value(default).prompt())
}

/// Free text that starts empty; blank means "leave as is".
pub fn optional_text(message: &str) -> Result<Option<String>> {
    answer(
        Text::new(message)
            .with_help_message("Leave blank to keep the current value")
            .prompt(),
    )
}

pub fn target(default: TargetLoudness) -> Result<Option<TargetLoudness>> {
    let input = answer(
        Text::new("Target loudness (LUFS):")
            .with_default(&format!("{:.1}", default.lufs()))
            .with_validator(|input: &str| {
                Ok(match TargetLoudness::parse(input) {
                    Ok(_) => Validation::Valid,
                    Err(e) => Validation::Invalid(validation_message(&e).into()),
                })
            })
            .prompt(),
    )?;
    input.map(|s| TargetLoudness::parse(&s).map_err(Into::into)).transpose()
}

fn validation_message(error: &chapsplit::Error) -> String {
    match error {
        chapsplit::Error::Validation(message) => message.clone(),
        other => other.to_string(),
    }
}
