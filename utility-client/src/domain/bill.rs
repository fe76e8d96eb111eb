use time::OffsetDateTime;

/// A billing-period total covering the half-open period `[start, end)`.
/// Bounds arrive as either bare dates or date-times; both normalize to UTC.
#[derive(Debug, Clone, PartialEq)]
pub struct Bill {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub total: f64,
}

impl Bill {
    /// Whether `day_start` (a UTC midnight) falls inside this bill's period.
    pub fn covers(&self, day_start: OffsetDateTime) -> bool {
        self.start <= day_start && day_start < self.end
    }
}
