use gamescribe_common::config::WritingSettings;

/// Paragraph bounds handed to the writer for one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParagraphRange {
    pub min: u32,
    pub max: u32,
}

impl ParagraphRange {
    /// Spread `target_words` evenly across `sections` and convert to a
    /// paragraph window around the ideal count, clamped to the global
    /// floor and ceiling.
    pub fn for_section(target_words: u32, sections: usize, settings: &WritingSettings) -> Self {
        let sections = u32::try_from(sections.max(1)).unwrap_or(u32::MAX);
        let words_per_section = f64::from(target_words) / f64::from(sections);
        let per_paragraph = f64::from(settings.words_per_paragraph.max(1));
        let ideal = (words_per_section / per_paragraph).round() as u32;

        let floor = settings.min_paragraphs;
        let ceiling = settings.max_paragraphs.max(floor);

        let min = ideal
            .saturating_sub(settings.paragraph_lower_offset)
            .clamp(floor, ceiling);
        let max = ideal
            .saturating_add(settings.paragraph_upper_offset)
            .clamp(floor, ceiling)
            .max(min);

        Self { min, max }
    }

    pub fn describe(&self) -> String {
        if self.min == self.max {
            format!("{} paragraphs", self.min)
        } else {
            format!("{} to {} paragraphs", self.min, self.max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typical_article_gets_a_window_around_the_ideal() {
        // 1800 words / 4 sections = 450 words = 5 paragraphs of 90.
        let range = ParagraphRange::for_section(1800, 4, &WritingSettings::default());
        assert_eq!(range, ParagraphRange { min: 4, max: 6 });
        assert_eq!(range.describe(), "4 to 6 paragraphs");
    }

    #[test]
    fn short_and_long_targets_hit_floor_and_ceiling() {
        let settings = WritingSettings::default();
        assert_eq!(
            ParagraphRange::for_section(300, 10, &settings),
            ParagraphRange { min: 2, max: 2 }
        );
        assert_eq!(
            ParagraphRange::for_section(10_000, 3, &settings),
            ParagraphRange { min: 8, max: 8 }
        );
    }

    #[test]
    fn zero_sections_is_treated_as_one() {
        let range = ParagraphRange::for_section(450, 0, &WritingSettings::default());
        assert_eq!(range, ParagraphRange { min: 4, max: 6 });
    }
}
