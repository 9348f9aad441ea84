use std::fmt;

use dialoguer::{console::Term, theme::ColorfulTheme, Input, Select};
use error_stack::{IntoReport, ResultExt};

#[derive(Debug)]
pub struct DialoguerError;

impl fmt::Display for DialoguerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dialoguer error")
    }
}

impl std::error::Error for DialoguerError {}

pub type DialoguerResult<T> = error_stack::Result<T, DialoguerError>;

#[derive(Debug, Clone)]
pub struct Dialoguer;

impl Dialoguer {
    pub fn select<T>(prompt_text: String, items: Vec<T>, default: Option<usize>) -> DialoguerResult<usize>
    where
        T: ToString + Clone,
    {
        let colorful_theme = &ColorfulTheme::default();
        let mut select = Select::with_theme(colorful_theme);
        let dialog = select
            .with_prompt(&prompt_text)
            .items(&items)
            .default(default.unwrap_or(0));

        dialog
            .interact_on_opt(&Term::stderr())
            .into_report()
            .change_context(DialoguerError)?
            .ok_or(DialoguerError)
            .into_report()
            .attach_printable("Selection cancelled")
    }

    pub fn input(prompt_text: String) -> DialoguerResult<String> {
        let colorful_theme = &ColorfulTheme::default();
        let mut input = Input::<String>::with_theme(colorful_theme);
        let value = input
            .with_prompt(&prompt_text)
            .validate_with(|value: &String| -> Result<(), &str> {
                if value.trim().is_empty() {
                    Err("A value is required")
                } else {
                    Ok(())
                }
            })
            .interact_text()
            .into_report()
            .change_context(DialoguerError)?;

        Ok(value.trim().to_string())
    }
}
