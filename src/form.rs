use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackgroundLevel {
    #[default]
    Novice,
    AdvancedBeginner,
    Competence,
    Proficiency,
    Expertise,
    Mastery,
}

impl BackgroundLevel {
    pub const ALL: [BackgroundLevel; 6] = [
        BackgroundLevel::Novice,
        BackgroundLevel::AdvancedBeginner,
        BackgroundLevel::Competence,
        BackgroundLevel::Proficiency,
        BackgroundLevel::Expertise,
        BackgroundLevel::Mastery,
    ];

    pub fn label(self) -> &'static str {
        match self {
            BackgroundLevel::Novice => "Novice",
            BackgroundLevel::AdvancedBeginner => "Advanced Beginner",
            BackgroundLevel::Competence => "Competence",
            BackgroundLevel::Proficiency => "Proficiency",
            BackgroundLevel::Expertise => "Expertise",
            BackgroundLevel::Mastery => "Mastery",
        }
    }

    /// Form used inside request messages ("novice", "advanced beginner").
    pub fn as_prompt(self) -> String {
        self.label().to_lowercase()
    }

    pub fn parse(s: &str) -> Option<Self> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL.into_iter().find(|l| {
            let have: String = l
                .label()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            have == wanted
        })
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|l| *l == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StudyDuration {
    pub months: u32,
    pub weeks: u32,
    pub days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormData {
    pub topic: String,
    pub background: BackgroundLevel,
    pub study_materials: BTreeSet<String>,
    pub duration: StudyDuration,
    /// Hours per day.
    pub available_time: u32,
}

impl Default for FormData {
    fn default() -> Self {
        Self {
            topic: String::new(),
            background: BackgroundLevel::default(),
            study_materials: BTreeSet::from(["YouTube".to_string()]),
            duration: StudyDuration::default(),
            available_time: 0,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Please input topic first")]
    MissingTopic,

    #[error("{field} must be a whole number of zero or more, got {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("unknown background level {0:?}")]
    UnknownBackground(String),
}

impl FormData {
    /// The opening message for the generation pipeline. The backend matches on
    /// this wording, so it must not change.
    pub fn request_message(&self) -> String {
        format!(
            "Create a study plan for a {} student on {} using YouTube over {} months, {} weeks, and {} days with {} hours available per day",
            self.background.as_prompt(),
            self.topic.trim(),
            self.duration.months,
            self.duration.weeks,
            self.duration.days,
            self.available_time,
        )
    }

    /// Context passed along with availability checks for one day's resources.
    pub fn research_query(&self, day_topic: &str) -> String {
        format!(
            "{} in {} for {} within {} hours",
            day_topic,
            self.topic.trim(),
            self.background.as_prompt(),
            self.available_time
        )
    }

    pub fn require_topic(&self) -> Result<&str, FormError> {
        let t = self.topic.trim();
        if t.is_empty() {
            Err(FormError::MissingTopic)
        } else {
            Ok(t)
        }
    }

    pub fn value(&self, field: FormField) -> String {
        match field {
            FormField::Topic => self.topic.clone(),
            FormField::Background => self.background.label().to_string(),
            FormField::Months => self.duration.months.to_string(),
            FormField::Weeks => self.duration.weeks.to_string(),
            FormField::Days => self.duration.days.to_string(),
            FormField::AvailableTime => self.available_time.to_string(),
        }
    }

    pub fn set(&mut self, field: FormField, raw: &str) -> Result<(), FormError> {
        let raw = raw.trim();
        let number = || -> Result<u32, FormError> {
            if raw.is_empty() {
                return Ok(0);
            }
            raw.parse::<u32>().map_err(|_| FormError::NotANumber {
                field: field.label(),
                value: raw.to_string(),
            })
        };
        match field {
            FormField::Topic => self.topic = raw.to_string(),
            FormField::Background => {
                self.background = BackgroundLevel::parse(raw)
                    .ok_or_else(|| FormError::UnknownBackground(raw.to_string()))?
            }
            FormField::Months => self.duration.months = number()?,
            FormField::Weeks => self.duration.weeks = number()?,
            FormField::Days => self.duration.days = number()?,
            FormField::AvailableTime => self.available_time = number()?,
        }
        Ok(())
    }

    /// A copy with one field changed; `self` is left as is.
    pub fn with_edit(&self, field: FormField, raw: &str) -> Result<FormData, FormError> {
        let mut next = self.clone();
        next.set(field, raw)?;
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    Topic,
    Background,
    Months,
    Weeks,
    Days,
    AvailableTime,
}

impl FormField {
    pub const ALL: [FormField; 6] = [
        FormField::Topic,
        FormField::Background,
        FormField::Months,
        FormField::Weeks,
        FormField::Days,
        FormField::AvailableTime,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::Topic => "Topic",
            FormField::Background => "Background",
            FormField::Months => "Months",
            FormField::Weeks => "Weeks",
            FormField::Days => "Days",
            FormField::AvailableTime => "Hours per day",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            FormField::Topic => "What would you like to learn?",
            FormField::Background => "How would you describe your background?",
            FormField::Months => "How many months do you have?",
            FormField::Weeks => "...and weeks?",
            FormField::Days => "...and days?",
            FormField::AvailableTime => "How many hours can you study each day?",
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, FormField::Topic | FormField::Background)
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn prev(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }
}

/// The conversational form: one focused field with an edit buffer.
#[derive(Debug, Clone)]
pub struct FormState {
    pub data: FormData,
    pub field: FormField,
    pub buffer: String,
    pub error: Option<String>,
}

impl Default for FormState {
    fn default() -> Self {
        Self::new(FormData::default())
    }
}

impl FormState {
    pub fn new(data: FormData) -> Self {
        let field = FormField::Topic;
        let buffer = data.value(field);
        Self {
            data,
            field,
            buffer,
            error: None,
        }
    }

    /// Writes the buffer into the focused field. On a bad value the field
    /// keeps its previous contents and the error is remembered for display.
    pub fn commit(&mut self) -> Result<(), FormError> {
        let result = self.data.set(self.field, &self.buffer);
        self.error = result.as_ref().err().map(|e| e.to_string());
        result
    }

    pub fn focus(&mut self, field: FormField) {
        self.field = field;
        self.buffer = self.data.value(field);
    }

    /// Commits and moves on. Returns false when already on the last field or
    /// the value was rejected.
    pub fn advance(&mut self) -> bool {
        if self.commit().is_err() {
            return false;
        }
        match self.field.next() {
            Some(f) => {
                self.focus(f);
                true
            }
            None => false,
        }
    }

    pub fn retreat(&mut self) {
        if self.commit().is_ok() {
            if let Some(f) = self.field.prev() {
                self.focus(f);
            }
        }
    }

    pub fn is_last(&self) -> bool {
        self.field.next().is_none()
    }

    pub fn push_char(&mut self, c: char) {
        if self.field == FormField::Background {
            return;
        }
        if self.field.is_numeric() && !c.is_ascii_digit() {
            return;
        }
        self.buffer.push(c);
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
    }

    /// Left/right on the background selector.
    pub fn cycle_background(&mut self, forward: bool) {
        if self.field != FormField::Background {
            return;
        }
        let level = BackgroundLevel::parse(&self.buffer).unwrap_or(self.data.background);
        let level = if forward { level.next() } else { level.prev() };
        self.buffer = level.label().to_string();
    }

    /// Validated snapshot ready for submission.
    pub fn submit(&mut self) -> Result<FormData, FormError> {
        self.commit()?;
        self.data.require_topic()?;
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_message_format() {
        let data = FormData {
            topic: "X".into(),
            duration: StudyDuration {
                months: 1,
                weeks: 2,
                days: 3,
            },
            available_time: 2,
            ..FormData::default()
        };
        assert_eq!(
            data.request_message(),
            "Create a study plan for a novice student on X using YouTube over 1 months, 2 weeks, and 3 days with 2 hours available per day"
        );
    }

    #[test]
    fn request_message_uses_lowercase_level() {
        let data = FormData {
            topic: "Rust".into(),
            background: BackgroundLevel::AdvancedBeginner,
            ..FormData::default()
        };
        assert!(data
            .request_message()
            .starts_with("Create a study plan for a advanced beginner student on Rust"));
    }

    #[test]
    fn research_query_format() {
        let data = FormData {
            topic: "Rust".into(),
            available_time: 3,
            ..FormData::default()
        };
        assert_eq!(
            data.research_query("Ownership"),
            "Ownership in Rust for novice within 3 hours"
        );
    }

    #[test]
    fn numeric_fields_reject_non_numbers() {
        let mut data = FormData::default();
        assert!(matches!(
            data.set(FormField::Weeks, "-1"),
            Err(FormError::NotANumber { .. })
        ));
        assert_eq!(data.duration.weeks, 0);
        data.set(FormField::Weeks, " 4 ").unwrap();
        assert_eq!(data.duration.weeks, 4);
    }

    #[test]
    fn background_parses_loosely() {
        assert_eq!(
            BackgroundLevel::parse("advanced beginner"),
            Some(BackgroundLevel::AdvancedBeginner)
        );
        assert_eq!(BackgroundLevel::parse("MASTERY"), Some(BackgroundLevel::Mastery));
        assert_eq!(BackgroundLevel::parse("guru"), None);
        assert_eq!(BackgroundLevel::Mastery.next(), BackgroundLevel::Novice);
        assert_eq!(BackgroundLevel::Novice.prev(), BackgroundLevel::Mastery);
    }

    #[test]
    fn form_walks_fields_in_order() {
        let mut form = FormState::default();
        for c in "Go".chars() {
            form.push_char(c);
        }
        assert!(form.advance());
        assert_eq!(form.field, FormField::Background);
        form.cycle_background(true);
        assert!(form.advance());
        assert_eq!(form.data.background, BackgroundLevel::AdvancedBeginner);

        form.backspace();
        form.push_char('x');
        form.push_char('2');
        assert_eq!(form.buffer, "2");
        while form.advance() {}
        assert!(form.is_last());

        let data = form.submit().unwrap();
        assert_eq!(data.topic, "Go");
        assert_eq!(data.duration.months, 2);
    }

    #[test]
    fn submit_requires_topic() {
        let mut form = FormState::default();
        assert_eq!(form.submit(), Err(FormError::MissingTopic));
    }

    #[test]
    fn with_edit_leaves_original_untouched() {
        let data = FormData {
            topic: "Rust".into(),
            ..FormData::default()
        };
        let edited = data.with_edit(FormField::AvailableTime, "5").unwrap();
        assert_eq!(edited.available_time, 5);
        assert_eq!(data.available_time, 0);
    }
}
