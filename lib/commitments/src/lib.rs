//! Commitment engine for the minder platform.
//!
//! Models user-made promises as a state machine:
//!
//! - **Entities**: commitments with importance, effort, due-by, and a
//!   deterministic urgency score
//! - **Transitions**: every state change passes an authority gate;
//!   denied system transitions become proposals
//! - **Progress**: an append-only, provenance-linked progress log that
//!   stamps `last_progress_at` atomically
//! - **Schedule links**: at most one active link per commitment
//! - **Miss detection**: due-by expiry moves OPEN commitments to MISSED
//!   and notifies through the attention router
//! - **Proposals**: dedupe and creation-approval proposals with stable
//!   fingerprint references for reply-based decisions
//! - **Loop closure & review**: keyword reply parsing and the weekly
//!   review aggregation

pub mod commitment;
pub mod error;
pub mod extraction;
pub mod links;
pub mod loop_closure;
pub mod miss_detection;
pub mod notifications;
pub mod progress;
pub mod proposals;
pub mod review;
pub mod store;
pub mod transition;

pub use commitment::{compute_urgency, Commitment, CommitmentState, NewCommitment, UpdateCommitment};
pub use error::{CommitmentError, CommitmentStoreError};
pub use extraction::{extract_commitments, CommitmentCandidate};
pub use links::{CommitmentScheduleLink, LinkService};
pub use loop_closure::{
    parse_loop_closure_reply, LoopClosureIntent, LoopClosureOutcome, LoopClosureReply,
    LoopClosureService,
};
pub use miss_detection::{
    handle_miss_detection_callback, MissDetectionResult, MissDetectionStatus,
    MissedNotificationHook,
};
pub use notifications::{NotificationSubmitter, RecordingSubmitter, RouterSubmitter};
pub use progress::{CommitmentProgress, NewProgress, ProgressService};
pub use proposals::{
    build_proposal_ref, CreationConfig, CreationOutcome, CreationProposal, CreationProposalKind,
    CreationService, CommitmentDraft, CreationSource, ProposalStatus, TransitionProposal,
};
pub use review::{ReviewDedupeConfig, ReviewDedupePair, ReviewSummary, WeeklyReviewService};
pub use store::{CommitmentFilter, CommitmentStore, InMemoryCommitmentStore};
pub use transition::{
    evaluate_transition_authority, AuthorityDecision, NullTransitionHook, TransitionConfig,
    TransitionHook, TransitionOutcome, TransitionRecord, TransitionRequest, TransitionService,
};
