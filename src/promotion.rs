//! Session-end promotion: a pure proposal phase the caller can review and
//! edit, and a commit phase that applies every decision or none.

use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

use crate::aggregate::mean_of_positive;
use crate::error::EngineError;
use crate::model::{Class, ScoreRecord, Student};
use crate::settings::validate_threshold;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermAverage {
    pub term: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub student_id: String,
    pub session: String,
    pub terms: Vec<TermAverage>,
    pub overall_average: f64,
}

/// Per-term averages of one student across a session, ordered by `terms`
/// (terms not listed there follow in input order), and their positive mean.
pub fn session_summary(
    student_id: &str,
    records: &[ScoreRecord],
    session: &str,
    terms: &[String],
) -> SessionSummary {
    let mut mine: Vec<&ScoreRecord> = records
        .iter()
        .filter(|r| r.student_id == student_id && r.session == session)
        .collect();
    mine.sort_by_key(|r| terms.iter().position(|t| *t == r.term).unwrap_or(usize::MAX));

    SessionSummary {
        student_id: student_id.to_string(),
        session: session.to_string(),
        overall_average: mean_of_positive(mine.iter().map(|r| r.average)),
        terms: mine
            .iter()
            .map(|r| TermAverage {
                term: r.term.clone(),
                average: r.average,
            })
            .collect(),
    }
}

/// Class after `class_id` in promotion order, `None` for the final class.
pub fn next_class<'a>(
    classes: &'a [Class],
    class_id: &str,
) -> Result<Option<&'a Class>, EngineError> {
    let mut ordered: Vec<&Class> = classes.iter().collect();
    ordered.sort_by_key(|c| c.sort_order);
    let idx = ordered
        .iter()
        .position(|c| c.id == class_id)
        .ok_or_else(|| EngineError::not_found("class", class_id))?;
    Ok(ordered.get(idx + 1).copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Proposed,
    Edited,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Promote,
    Repeat,
}

impl Decision {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "promote" => Some(Self::Promote),
            "repeat" => Some(Self::Repeat),
            _ => None,
        }
    }

    fn toggled(self) -> Self {
        match self {
            Self::Promote => Self::Repeat,
            Self::Repeat => Self::Promote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProposal {
    pub student_id: String,
    pub display_name: String,
    pub term_averages: Vec<TermAverage>,
    pub overall_average: f64,
    pub eligible: bool,
    pub decision: Decision,
    pub target_class_id: String,
    /// Decision differs from what eligibility alone would give.
    pub overridden: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub total: usize,
    pub eligible: usize,
    pub ineligible: usize,
    pub promoting: usize,
    pub repeating: usize,
    pub overridden: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSet {
    pub id: String,
    pub source_class_id: String,
    pub next_class_id: String,
    pub session: String,
    pub threshold: f64,
    pub state: ProposalState,
    pub students: Vec<StudentProposal>,
    pub summary: ProposalSummary,
}

impl ProposalSet {
    fn refresh_summary(&mut self) {
        let mut s = ProposalSummary {
            total: self.students.len(),
            ..ProposalSummary::default()
        };
        for p in &self.students {
            if p.eligible {
                s.eligible += 1;
            } else {
                s.ineligible += 1;
            }
            match p.decision {
                Decision::Promote => s.promoting += 1,
                Decision::Repeat => s.repeating += 1,
            }
            if p.overridden {
                s.overridden += 1;
            }
        }
        self.summary = s;
    }

    fn target_for(&self, decision: Decision) -> &str {
        match decision {
            Decision::Promote => &self.next_class_id,
            Decision::Repeat => &self.source_class_id,
        }
    }

    /// Sets one student's decision explicitly; `None` toggles it.
    pub fn set_decision(
        &mut self,
        student_id: &str,
        decision: Option<Decision>,
    ) -> Result<Decision, EngineError> {
        if self.state == ProposalState::Committed {
            return Err(EngineError::AlreadyCommitted {
                proposal_id: self.id.clone(),
            });
        }
        let idx = self
            .students
            .iter()
            .position(|p| p.student_id == student_id)
            .ok_or_else(|| EngineError::not_found("student", student_id))?;

        let current = self.students[idx].decision;
        let next = decision.unwrap_or_else(|| current.toggled());
        let target = self.target_for(next).to_string();

        let p = &mut self.students[idx];
        p.decision = next;
        p.target_class_id = target;
        p.overridden = (next == Decision::Promote) != p.eligible;

        self.state = ProposalState::Edited;
        self.refresh_summary();
        Ok(next)
    }

    pub fn plan(&self) -> CommitPlan {
        CommitPlan {
            proposal_id: self.id.clone(),
            source_class_id: self.source_class_id.clone(),
            next_class_id: self.next_class_id.clone(),
            session: self.session.clone(),
            threshold: self.threshold,
            decisions: self
                .students
                .iter()
                .map(|p| PlannedDecision {
                    student_id: p.student_id.clone(),
                    target_class_id: p.target_class_id.clone(),
                })
                .collect(),
        }
    }
}

/// Inputs to a proposal, supplied by the caller on every call.
#[derive(Debug, Clone, Copy)]
pub struct Roster<'a> {
    pub classes: &'a [Class],
    pub students: &'a [Student],
    pub records: &'a [ScoreRecord],
    /// Term order of a session, used only to order per-term averages.
    pub terms: &'a [String],
}

pub fn propose(
    roster: &Roster<'_>,
    source_class_id: &str,
    session: &str,
    threshold: f64,
) -> Result<ProposalSet, EngineError> {
    let threshold = validate_threshold(threshold)?;
    if session.trim().is_empty() {
        return Err(EngineError::validation("session must not be empty"));
    }
    let next = next_class(roster.classes, source_class_id)?.ok_or_else(|| {
        EngineError::NoNextClass {
            class_id: source_class_id.to_string(),
        }
    })?;

    let students = roster
        .students
        .iter()
        .filter(|s| s.class_id == source_class_id)
        .map(|s| {
            let summary = session_summary(&s.id, roster.records, session, roster.terms);
            let eligible = summary.overall_average >= threshold;
            StudentProposal {
                student_id: s.id.clone(),
                display_name: s.display_name(),
                term_averages: summary.terms,
                overall_average: summary.overall_average,
                eligible,
                decision: if eligible {
                    Decision::Promote
                } else {
                    Decision::Repeat
                },
                target_class_id: if eligible {
                    next.id.clone()
                } else {
                    source_class_id.to_string()
                },
                overridden: false,
            }
        })
        .collect();

    let mut proposal = ProposalSet {
        id: Uuid::new_v4().to_string(),
        source_class_id: source_class_id.to_string(),
        next_class_id: next.id.clone(),
        session: session.to_string(),
        threshold,
        state: ProposalState::Proposed,
        students,
        summary: ProposalSummary::default(),
    };
    proposal.refresh_summary();

    tracing::info!(
        proposal_id = %proposal.id,
        source_class = %proposal.source_class_id,
        next_class = %proposal.next_class_id,
        session = %proposal.session,
        eligible = proposal.summary.eligible,
        total = proposal.summary.total,
        "promotion proposed"
    );
    Ok(proposal)
}

/// Toggles one student between promote and repeat.
pub fn override_decision(
    mut proposal: ProposalSet,
    student_id: &str,
) -> Result<ProposalSet, EngineError> {
    proposal.set_decision(student_id, None)?;
    Ok(proposal)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedDecision {
    pub student_id: String,
    pub target_class_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPlan {
    pub proposal_id: String,
    pub source_class_id: String,
    pub next_class_id: String,
    pub session: String,
    pub threshold: f64,
    pub decisions: Vec<PlannedDecision>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitCounts {
    pub students_moved: usize,
    pub students_retained: usize,
    pub records_annotated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    pub proposal_id: String,
    #[serde(flatten)]
    pub counts: CommitCounts,
}

/// Persistence boundary for a promotion commit.
///
/// `apply` must be all-or-nothing: every student still has to be in the plan's
/// source class, and on any failure no change may be visible afterwards.
/// Writes that would not change a value are skipped and not counted.
pub trait PromotionStore {
    fn apply(&mut self, plan: &CommitPlan) -> Result<CommitCounts, EngineError>;
}

pub fn commit<S>(proposal: &mut ProposalSet, store: &mut S) -> Result<CommitResult, EngineError>
where
    S: PromotionStore + ?Sized,
{
    if proposal.state == ProposalState::Committed {
        return Err(EngineError::AlreadyCommitted {
            proposal_id: proposal.id.clone(),
        });
    }
    let plan = proposal.plan();
    let counts = match store.apply(&plan) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(
                proposal_id = %plan.proposal_id,
                error = %e,
                "promotion commit rejected"
            );
            return Err(e);
        }
    };
    proposal.state = ProposalState::Committed;

    tracing::info!(
        proposal_id = %plan.proposal_id,
        moved = counts.students_moved,
        retained = counts.students_retained,
        annotated = counts.records_annotated,
        "promotion committed"
    );
    Ok(CommitResult {
        proposal_id: plan.proposal_id,
        counts,
    })
}

/// In-memory store over owned snapshots. Changes are staged on copies and
/// swapped in only when every decision applied.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub students: Vec<Student>,
    pub records: Vec<ScoreRecord>,
    committed: HashSet<String>,
}

impl MemoryStore {
    pub fn new(students: Vec<Student>, records: Vec<ScoreRecord>) -> Self {
        Self {
            students,
            records,
            committed: HashSet::new(),
        }
    }
}

impl PromotionStore for MemoryStore {
    fn apply(&mut self, plan: &CommitPlan) -> Result<CommitCounts, EngineError> {
        if self.committed.contains(&plan.proposal_id) {
            return Err(EngineError::AlreadyCommitted {
                proposal_id: plan.proposal_id.clone(),
            });
        }
        let mut students = self.students.clone();
        let mut records = self.records.clone();
        let mut counts = CommitCounts::default();

        for d in &plan.decisions {
            let Some(s) = students.iter_mut().find(|s| s.id == d.student_id) else {
                return Err(EngineError::partial_commit(
                    "student no longer exists",
                    Some(&d.student_id),
                ));
            };
            if s.class_id != plan.source_class_id {
                return Err(EngineError::partial_commit(
                    "student is no longer in the source class",
                    Some(&d.student_id),
                ));
            }
            if s.class_id != d.target_class_id {
                s.class_id = d.target_class_id.clone();
                counts.students_moved += 1;
            } else {
                counts.students_retained += 1;
            }

            for r in records
                .iter_mut()
                .filter(|r| r.student_id == d.student_id && r.session == plan.session)
            {
                if r.promoted_to.as_deref() != Some(d.target_class_id.as_str()) {
                    r.promoted_to = Some(d.target_class_id.clone());
                    counts.records_annotated += 1;
                }
            }
        }

        self.students = students;
        self.records = records;
        self.committed.insert(plan.proposal_id.clone());
        Ok(counts)
    }
}
