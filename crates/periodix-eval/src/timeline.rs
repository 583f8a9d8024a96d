//! The monthly period axis and its calendar-derived constants (`T.*`).

use chrono::NaiveDate;

use periodix_common::Series;

/// A year/month pair naming an inclusive start or end of the model horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month), "month out of range: {month}");
        Self { year, month }
    }

    /// Absolute month index, used for simple difference arithmetic
    /// (`12*y + m`).
    fn absolute(self) -> i64 {
        12 * self.year as i64 + self.month as i64
    }
}

/// The enumerated monthly period axis plus its calendar derivations.
#[derive(Debug, Clone)]
pub struct Timeline {
    start: YearMonth,
    end: YearMonth,
    year: Vec<i32>,
    month: Vec<u32>,
}

/// Days in `(y, m)`, by diffing against the first of the following month
/// rather than a hand-rolled leap-year table — `chrono` already carries the
/// Gregorian calendar rules the spec calls for.
fn days_in_month(y: i32, m: u32) -> u32 {
    let this = NaiveDate::from_ymd_opt(y, m, 1).expect("valid calendar month");
    let next = if m == 12 {
        NaiveDate::from_ymd_opt(y + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(y, m + 1, 1)
    }
    .expect("valid calendar month");
    (next - this).num_days() as u32
}

fn days_in_year(y: i32) -> u32 {
    if days_in_month(y, 2) == 29 {
        366
    } else {
        365
    }
}

impl Timeline {
    /// Build the period axis from an inclusive `(start, end)` year/month
    /// range. Panics if `end` precedes `start` (a malformed config, not a
    /// recoverable runtime condition. This mirrors the reference
    /// implementation, which would otherwise produce a negative-length
    /// timeline and fail confusingly much later).
    pub fn build(start: YearMonth, end: YearMonth) -> Self {
        assert!(
            end.absolute() >= start.absolute(),
            "timeline end {end:?} precedes start {start:?}"
        );
        let periods = (end.absolute() - start.absolute() + 1) as usize;
        let mut year = Vec::with_capacity(periods);
        let mut month = Vec::with_capacity(periods);
        let (mut y, mut m) = (start.year, start.month);
        for _ in 0..periods {
            year.push(y);
            month.push(m);
            if m == 12 {
                m = 1;
                y += 1;
            } else {
                m += 1;
            }
        }
        Self {
            start,
            end,
            year,
            month,
        }
    }

    pub fn start(&self) -> YearMonth {
        self.start
    }

    pub fn end(&self) -> YearMonth {
        self.end
    }

    pub fn periods(&self) -> usize {
        self.year.len()
    }

    pub fn year_at(&self, t: usize) -> i32 {
        self.year[t]
    }

    pub fn month_at(&self, t: usize) -> u32 {
        self.month[t]
    }

    /// Period index of `(year, month)`, if it falls within the timeline.
    pub fn index_of(&self, year: i32, month: u32) -> Option<usize> {
        let want = YearMonth::new(year, month).absolute();
        if want < self.start.absolute() || want > self.end.absolute() {
            return None;
        }
        Some((want - self.start.absolute()) as usize)
    }

    /// The `T.*` calendar constants, as a name -> array map ready for
    /// insertion into the reference map.
    pub fn calendar_constants(&self) -> Vec<(&'static str, Series)> {
        let p = self.periods();
        let mut dim = Series::zeros(p);
        let mut diy = Series::zeros(p);
        let mut him = Series::zeros(p);
        let mut hiy = Series::zeros(p);
        let mut diq = Series::zeros(p);
        let mut qe = Series::zeros(p);
        let mut cye = Series::zeros(p);
        let mut fye = Series::zeros(p);

        for t in 0..p {
            let y = self.year[t];
            let m = self.month[t];
            let d = days_in_month(y, m) as f64;
            dim.set(t, d);
            diy.set(t, days_in_year(y) as f64);
            him.set(t, d * 24.0);
            hiy.set(t, days_in_year(y) as f64 * 24.0);

            let quarter_start = ((m - 1) / 3) * 3 + 1;
            let q_days: u32 = (quarter_start..quarter_start + 3)
                .map(|qm| days_in_month(y, qm))
                .sum();
            diq.set(t, q_days as f64);

            qe.set(t, if matches!(m, 3 | 6 | 9 | 12) { 1.0 } else { 0.0 });
            cye.set(t, if m == 12 { 1.0 } else { 0.0 });
            fye.set(t, if m == 6 { 1.0 } else { 0.0 });
        }

        vec![
            ("T.DiM", dim),
            ("T.DiY", diy),
            ("T.HiM", him),
            ("T.HiY", hiy),
            ("T.DiQ", diq),
            ("T.QE", qe),
            ("T.CYE", cye),
            ("T.FYE", fye),
            ("T.MiY", Series::broadcast(12.0, p)),
            ("T.QiY", Series::broadcast(4.0, p)),
            ("T.HiD", Series::broadcast(24.0, p)),
            ("T.MiQ", Series::broadcast(3.0, p)),
        ]
    }
}
