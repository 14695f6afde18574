/// Outcome of polling one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScrapeStatus {
    /// An attempt was accepted and its rows handed to the sink
    Scraped,
    /// Every attempt was rejected or failed
    Empty,
    /// Rows were accepted but the sink refused them
    SinkFailed,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ScrapeStatus::Scraped => "Scraped",
            ScrapeStatus::Empty => "Empty",
            ScrapeStatus::SinkFailed => "SinkFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_names_are_distinct() {
        let names: Vec<&str> = [ScrapeStatus::Scraped, ScrapeStatus::Empty, ScrapeStatus::SinkFailed]
            .iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(names, vec!["Scraped", "Empty", "SinkFailed"]);
    }
}
