use std::time::Duration;

use typed_builder::TypedBuilder;

use gamescribe_common::{ArticleCategory, GenerationError};

const MIN_TARGET_WORDS: u32 = 300;
const MAX_TARGET_WORDS: u32 = 10_000;

/// Caller input for one article.
#[derive(Debug, Clone, TypedBuilder)]
pub struct GenerationContext {
    #[builder(setter(into))]
    pub game_name: String,
    #[builder(default, setter(strip_option, into))]
    pub game_description: Option<String>,
    #[builder(default)]
    pub genres: Vec<String>,
    #[builder(default)]
    pub platforms: Vec<String>,
    pub category: ArticleCategory,
    #[builder(default = 1500)]
    pub target_word_count: u32,
    #[builder(default, setter(strip_option, into))]
    pub instructions: Option<String>,
    /// Overrides the category's default writing mode.
    #[builder(default, setter(strip_option))]
    pub parallel_sections: Option<bool>,
    /// Overrides the configured run timeout.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

impl GenerationContext {
    /// Check every field and report all violations together.
    pub fn validate(&self) -> Result<(), GenerationError> {
        let mut violations = Vec::new();

        if self.game_name.trim().is_empty() {
            violations.push("game_name must not be blank".to_string());
        }
        if !(MIN_TARGET_WORDS..=MAX_TARGET_WORDS).contains(&self.target_word_count) {
            violations.push(format!(
                "target_word_count must be between {MIN_TARGET_WORDS} and {MAX_TARGET_WORDS}, got {}",
                self.target_word_count
            ));
        }
        if self.genres.iter().any(|g| g.trim().is_empty()) {
            violations.push("genres must not contain blank entries".to_string());
        }
        if self.platforms.iter().any(|p| p.trim().is_empty()) {
            violations.push("platforms must not contain blank entries".to_string());
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            violations.push("timeout must be greater than zero".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(GenerationError::ContextInvalid { violations })
        }
    }

    pub fn writes_in_parallel(&self) -> bool {
        self.parallel_sections
            .unwrap_or_else(|| self.category.default_parallel_writing())
    }

    /// Short description block shared by every agent prompt.
    pub fn describe(&self) -> String {
        let mut out = format!("Game: {}\nArticle type: {}\n", self.game_name.trim(), self.category);
        if let Some(description) = self.game_description.as_deref().filter(|d| !d.trim().is_empty()) {
            out.push_str(&format!("Description: {}\n", description.trim()));
        }
        if !self.genres.is_empty() {
            out.push_str(&format!("Genres: {}\n", self.genres.join(", ")));
        }
        if !self.platforms.is_empty() {
            out.push_str(&format!("Platforms: {}\n", self.platforms.join(", ")));
        }
        out.push_str(&format!("Target length: about {} words\n", self.target_word_count));
        if let Some(instructions) = self.instructions.as_deref().filter(|i| !i.trim().is_empty()) {
            out.push_str(&format!("Extra instructions: {}\n", instructions.trim()));
        }
        out
    }
}
