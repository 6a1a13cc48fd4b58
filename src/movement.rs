//! Movement records: the immutable facts the ledger is built from
use super::error::ValidationError;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn date(&self) -> CalendarDate {
        CalendarDate(self.0.date_naive())
    }
}

// `Utc` itself is not `Ord`, so ordering is written against the instant.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// A calendar day without time of day, used for due dates.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }
    pub fn today() -> Self {
        Self(Utc::now().date_naive())
    }
    pub fn to_naive(&self) -> NaiveDate {
        self.0
    }
    pub fn add_days(&self, days: u32) -> Option<Self> {
        self.0
            .checked_add_days(chrono::Days::new(u64::from(days)))
            .map(Self)
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(value: NaiveDate) -> Self {
        CalendarDate(value)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%d/%m/%Y"))
    }
}

impl<C> minicbor::Encode<C> for CalendarDate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for CalendarDate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(CalendarDate)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day count to a calendar date",
            ))
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
pub enum Category {
    #[default]
    #[n(0)]
    Book,
    #[n(1)]
    Game,
    #[n(2)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementKind {
    #[n(0)]
    Loan,
    #[n(1)]
    Return,
}

/// Who holds the item. Returns repeat the borrower of their loan for display only;
/// loans and returns are linked through `loan_id`, never through the borrower.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum Borrower {
    #[n(0)]
    Student {
        #[n(0)]
        name: String,
        #[n(1)]
        surname: String,
        #[n(2)]
        class_label: String,
    },
    #[n(1)]
    Teacher {
        #[n(0)]
        name: String,
    },
}

fn required(
    value: &str,
    variant: &'static str,
    field: &'static str,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingBorrowerField { variant, field });
    }
    Ok(trimmed.to_string())
}

impl Borrower {
    pub fn student(name: &str, surname: &str, class_label: &str) -> Result<Self, ValidationError> {
        Ok(Borrower::Student {
            name: required(name, "Student", "name")?,
            surname: required(surname, "Student", "surname")?,
            class_label: required(class_label, "Student", "class_label")?,
        })
    }
    pub fn teacher(name: &str) -> Result<Self, ValidationError> {
        Ok(Borrower::Teacher {
            name: required(name, "Teacher", "name")?,
        })
    }
    pub fn display_name(&self) -> String {
        match self {
            Borrower::Student { name, surname, .. } => format!("{name} {surname}"),
            Borrower::Teacher { name } => name.clone(),
        }
    }
    pub fn class_label(&self) -> Option<&str> {
        match self {
            Borrower::Student { class_label, .. } => Some(class_label),
            Borrower::Teacher { .. } => None,
        }
    }
    /// Case-insensitive substring match over the name fields.
    pub fn name_contains(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        match self {
            Borrower::Student { name, surname, .. } => {
                name.to_lowercase().contains(&needle) || surname.to_lowercase().contains(&needle)
            }
            Borrower::Teacher { name } => name.to_lowercase().contains(&needle),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanLink {
    /// No link recorded (legacy data).
    Unlinked,
    /// Resolved to the movement's own id at append time.
    SelfIdentity,
    Loan(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Movement {
    #[n(0)]
    pub id: u64,
    #[n(1)]
    pub occurred_at: TimeStamp<Utc>,
    #[n(2)]
    pub kind: MovementKind,
    #[n(3)]
    pub item_key: String,
    #[n(4)]
    pub category: Category,
    #[n(5)]
    pub quantity: u32,
    #[n(6)]
    pub borrower: Borrower,
    #[n(7)]
    pub due_on: Option<CalendarDate>,
    #[n(8)]
    pub loan_id: Option<u64>,
    #[n(9)]
    pub operator: String, // who was on duty at the desk
    #[n(10)]
    pub notes: String,
}

impl Movement {
    pub fn is_loan(&self) -> bool {
        self.kind == MovementKind::Loan
    }
    pub fn is_return(&self) -> bool {
        self.kind == MovementKind::Return
    }
    /// Durable total order: timestamp first, id breaks ties.
    pub fn chronological_key(&self) -> (DateTime<Utc>, u64) {
        (self.occurred_at.to_datetime_utc(), self.id)
    }
    /// Linked copy of a legacy return carrying part of its quantity.
    pub fn split_part(&self, id: u64, loan_id: Option<u64>, quantity: u32) -> Movement {
        Movement {
            id,
            loan_id,
            quantity,
            ..self.clone()
        }
    }
}

/// A movement before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub kind: MovementKind,
    pub item_key: String,
    pub category: Category,
    pub quantity: u32,
    pub borrower: Borrower,
    pub due_on: Option<CalendarDate>,
    pub link: LoanLink,
    pub operator: String,
    pub notes: String,
    pub occurred_at: Option<TimeStamp<Utc>>,
}

impl MovementDraft {
    pub fn new(
        kind: MovementKind,
        item_key: impl Into<String>,
        quantity: u32,
        borrower: Borrower,
    ) -> Self {
        let link = match kind {
            MovementKind::Loan => LoanLink::SelfIdentity,
            MovementKind::Return => LoanLink::Unlinked,
        };
        Self {
            kind,
            item_key: item_key.into(),
            category: Category::default(),
            quantity,
            borrower,
            due_on: None,
            link,
            operator: String::new(),
            notes: String::new(),
            occurred_at: None,
        }
    }
    pub fn loan(item_key: impl Into<String>, quantity: u32, borrower: Borrower) -> Self {
        Self::new(MovementKind::Loan, item_key, quantity, borrower)
    }
    pub fn return_of(item_key: impl Into<String>, quantity: u32, borrower: Borrower) -> Self {
        Self::new(MovementKind::Return, item_key, quantity, borrower)
    }
    pub fn set_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }
    pub fn set_due_on(mut self, due_on: CalendarDate) -> Self {
        self.due_on = Some(due_on);
        self
    }
    pub fn set_link(mut self, link: LoanLink) -> Self {
        self.link = link;
        self
    }
    pub fn set_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
    pub fn set_occurred_at(mut self, occurred_at: TimeStamp<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if self.item_key.trim().is_empty() {
            return Err(ValidationError::EmptyItemKey);
        }
        Ok(())
    }
    /// Materialise the record under the id the store assigned.
    pub fn assign(&self, id: u64, now: TimeStamp<Utc>) -> Movement {
        let loan_id = match self.link {
            LoanLink::Unlinked => None,
            LoanLink::SelfIdentity => Some(id),
            LoanLink::Loan(loan_id) => Some(loan_id),
        };
        let due_on = match self.kind {
            MovementKind::Loan => self.due_on,
            MovementKind::Return => None,
        };
        Movement {
            id,
            occurred_at: self.occurred_at.clone().unwrap_or(now),
            kind: self.kind,
            item_key: self.item_key.clone(),
            category: self.category,
            quantity: self.quantity,
            borrower: self.borrower.clone(),
            due_on,
            loan_id,
            operator: self.operator.clone(),
            notes: self.notes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ana() -> Borrower {
        Borrower::student("Ana", "Souza", "5A").unwrap()
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let morning = TimeStamp::new_with(2024, 5, 2, 9, 0, 0).unwrap();
        let evening = TimeStamp::new_with(2024, 5, 2, 18, 0, 0).unwrap();
        let next_day = TimeStamp::new_with(2024, 5, 3, 8, 0, 0).unwrap();

        assert!(morning < evening);
        assert_eq!(next_day.cmp(&evening), Ordering::Greater);
        assert_eq!(morning.partial_cmp(&morning.clone()), Some(Ordering::Equal));
    }

    #[test]
    fn calendar_date_encoding() {
        let original = CalendarDate::from_ymd(2024, 2, 29).unwrap();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: CalendarDate = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn movement_encoding_keeps_every_field() {
        let original = MovementDraft::loan("Atlas", 2, ana())
            .set_category(Category::Game)
            .set_due_on(CalendarDate::from_ymd(2024, 6, 3).unwrap())
            .set_operator("desk")
            .set_notes("torn cover")
            .assign(7, TimeStamp::new());

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: Movement = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn student_requires_every_field() {
        assert_eq!(
            Borrower::student("Ana", "  ", "5A"),
            Err(ValidationError::MissingBorrowerField {
                variant: "Student",
                field: "surname"
            })
        );
        assert!(Borrower::teacher("").is_err());
        assert_eq!(ana().display_name(), "Ana Souza");
    }

    #[test]
    fn loan_draft_links_to_itself() {
        let loan = MovementDraft::loan("Atlas", 1, ana()).assign(12, TimeStamp::new());
        assert_eq!(loan.loan_id, Some(12));

        let legacy = MovementDraft::return_of("Atlas", 1, ana()).assign(13, TimeStamp::new());
        assert_eq!(legacy.loan_id, None);
    }

    #[test]
    fn return_draft_drops_due_date() {
        let ret = MovementDraft::return_of("Atlas", 1, ana())
            .set_due_on(CalendarDate::from_ymd(2024, 6, 3).unwrap())
            .assign(1, TimeStamp::new());
        assert_eq!(ret.due_on, None);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let draft = MovementDraft::loan("Atlas", 0, ana());
        assert_eq!(draft.validate(), Err(ValidationError::ZeroQuantity));
    }
}
