//! Results presentation: pure view models derived from `MatchResults`.
//!
//! Nothing here touches the network or the workflow state. The two patient
//! lists are rendered exactly as the backend partitioned them.

use std::fmt::Write as _;

use serde::Serialize;

use crate::models::{CriteriaSummary, CriterionReasoning, MatchResults, MatchSummary, PatientRecord};

pub const NOT_AVAILABLE: &str = "N/A";
pub const UNKNOWN_TRIAL_TITLE: &str = "Unknown Trial";
pub const NO_MATCHING_TEXT: &str = "No matching patients found for this trial";
pub const NO_NON_MATCHING_TEXT: &str = "No non-matching patients for this trial";

/// Match rate as a one-decimal percentage, or "N/A" when nobody was evaluated.
pub fn format_match_rate(summary: &MatchSummary) -> String {
    match summary.match_rate() {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => NOT_AVAILABLE.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════
// Criteria progress bar
// ═══════════════════════════════════════════════════════════

/// Segment widths in percent. A zero total is treated as 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriteriaBar {
    pub met_pct: f64,
    pub unsure_pct: f64,
    pub not_met_pct: f64,
    pub met_label: String,
    pub not_met_label: String,
}

impl CriteriaBar {
    pub fn from_summary(criteria: &CriteriaSummary) -> Self {
        let denominator = criteria.denominator();
        let pct = |count: u32| f64::from(count) / f64::from(denominator) * 100.0;
        let remainder = criteria
            .total
            .saturating_sub(criteria.met)
            .saturating_sub(criteria.unsure);

        Self {
            met_pct: pct(criteria.met),
            unsure_pct: pct(criteria.unsure),
            not_met_pct: pct(remainder),
            met_label: format!("Met: {}/{denominator}", criteria.met),
            not_met_label: format!("Not Met: {}/{denominator}", criteria.not_met),
        }
    }

    /// Fixed-width text bar: `#` met, `?` unsure, `x` not met.
    pub fn render(&self, width: usize) -> String {
        let cells = |pct: f64| ((pct / 100.0) * width as f64).round() as usize;
        let met = cells(self.met_pct).min(width);
        let unsure = cells(self.unsure_pct).min(width - met);
        let not_met = cells(self.not_met_pct).min(width - met - unsure);
        let empty = width - met - unsure - not_met;
        format!(
            "[{}{}{}{}]",
            "#".repeat(met),
            "?".repeat(unsure),
            "x".repeat(not_met),
            " ".repeat(empty)
        )
    }
}

// ═══════════════════════════════════════════════════════════
// Patient cards
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailSection {
    pub heading: &'static str,
    pub items: Vec<CriterionReasoning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientCardView {
    /// 1-based, only on the matching list.
    pub rank: Option<usize>,
    pub patient_id: String,
    pub score: String,
    pub eligible: bool,
    pub status: &'static str,
    pub distance: String,
    pub priority: String,
    pub criteria: CriteriaBar,
    pub rejection_reasons: Vec<String>,
    /// The record carries reasoning lists that a details toggle could reveal.
    pub has_details: bool,
    /// Non-empty reasoning lists, filled only when details are requested.
    pub details: Vec<DetailSection>,
}

impl PatientCardView {
    pub fn build(patient: &PatientRecord, rank: Option<usize>, show_details: bool) -> Self {
        let eligible = patient.is_eligible();
        let details = match (&patient.eligibility_details, show_details) {
            (Some(details), true) => [
                ("Met Criteria", &details.met),
                ("Not Met Criteria", &details.not_met),
                ("Uncertain Criteria", &details.unsure),
            ]
            .into_iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(heading, items)| DetailSection { heading, items: items.clone() })
            .collect(),
            _ => Vec::new(),
        };

        Self {
            rank,
            patient_id: patient.patient_id().to_string(),
            score: format!("{:.0}%", patient.score()),
            eligible,
            status: if eligible { "Eligible" } else { "Not Eligible" },
            distance: format_distance(patient.distance),
            priority: format_priority(patient),
            criteria: CriteriaBar::from_summary(&patient.criteria()),
            rejection_reasons: patient.rejection_reasons().to_vec(),
            has_details: patient.eligibility_details.as_ref().is_some_and(|d| !d.is_empty()),
            details,
        }
    }
}

/// A zero or missing distance means the backend did not compute one.
fn format_distance(distance: Option<f64>) -> String {
    match distance {
        Some(km) if km.is_finite() && km != 0.0 => format!("{km:.1} km"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn format_priority(patient: &PatientRecord) -> String {
    use crate::models::PriorityFactor;

    match &patient.priority_factor {
        Some(PriorityFactor::Number(n)) if *n != 0.0 && n.is_finite() => n.to_string(),
        Some(PriorityFactor::Text(s)) if !s.trim().is_empty() => s.clone(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════
// Results page
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientListView {
    /// Tab label with count, e.g. "Matching Patients (3)".
    pub label: String,
    pub empty_text: &'static str,
    pub cards: Vec<PatientCardView>,
}

impl PatientListView {
    fn build(
        name: &str,
        empty_text: &'static str,
        patients: &[PatientRecord],
        ranked: bool,
        show_details: bool,
    ) -> Self {
        let cards = patients
            .iter()
            .enumerate()
            .map(|(i, p)| PatientCardView::build(p, ranked.then_some(i + 1), show_details))
            .collect();
        Self {
            label: format!("{name} ({})", patients.len()),
            empty_text,
            cards,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsView {
    pub title: String,
    pub total_evaluated: u32,
    pub total_matching: u32,
    pub match_rate: String,
    pub matching: PatientListView,
    pub non_matching: PatientListView,
}

impl ResultsView {
    /// `active_title` is the title of the trial the run was started for; it is
    /// used when the results carry no title of their own.
    pub fn build(results: &MatchResults, active_title: Option<&str>, show_details: bool) -> Self {
        let title = [results.title.as_deref(), active_title]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_TRIAL_TITLE)
            .to_string();

        Self {
            title,
            total_evaluated: results.summary.total_evaluated,
            total_matching: results.summary.total_matching_patients,
            match_rate: format_match_rate(&results.summary),
            matching: PatientListView::build(
                "Matching Patients",
                NO_MATCHING_TEXT,
                &results.matching_patients,
                true,
                show_details,
            ),
            non_matching: PatientListView::build(
                "Non-Matching Patients",
                NO_NON_MATCHING_TEXT,
                &results.non_matching_patients,
                false,
                show_details,
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Plain-text rendering
// ═══════════════════════════════════════════════════════════

const BAR_WIDTH: usize = 20;

/// Render a results page for the terminal.
pub fn render_results_text(view: &ResultsView) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Patients matched to trial: {}", view.title);
    let _ = writeln!(out);
    let _ = writeln!(out, "Summary");
    let _ = writeln!(out, "  Total Patients Evaluated: {}", view.total_evaluated);
    let _ = writeln!(out, "  Matching Patients:        {}", view.total_matching);
    let _ = writeln!(out, "  Match Rate:               {}", view.match_rate);

    for list in [&view.matching, &view.non_matching] {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", list.label);
        if list.is_empty() {
            let _ = writeln!(out, "  {}", list.empty_text);
            continue;
        }
        for card in &list.cards {
            render_card(&mut out, card);
        }
    }
    out
}

fn render_card(out: &mut String, card: &PatientCardView) {
    let rank = card.rank.map(|r| format!("{r}. ")).unwrap_or_default();
    let _ = writeln!(out, "  {rank}{}  {}", card.patient_id, card.score);
    let _ = writeln!(
        out,
        "    {} {}  {}",
        card.criteria.render(BAR_WIDTH),
        card.criteria.met_label,
        card.criteria.not_met_label
    );
    let _ = writeln!(
        out,
        "    Status: {}  Distance: {}  Priority: {}",
        card.status, card.distance, card.priority
    );
    if !card.rejection_reasons.is_empty() {
        let _ = writeln!(out, "    Rejection Reasons:");
        for reason in &card.rejection_reasons {
            let _ = writeln!(out, "      - {reason}");
        }
    }
    for section in &card.details {
        let _ = writeln!(out, "    {}:", section.heading);
        for item in &section.items {
            let _ = writeln!(out, "      {}: {}", item.criterion, item.reasoning);
        }
    }
}
