// Integration test suite for the AIMP hub.
//
// One file per scenario from `spec.md` §8, sharing the `common::TestHub`
// harness for db lifecycle and mock collaborators.

mod common;

mod round_gating;
mod s1_consensus;
mod s2_stall_escalation;
mod s3_room_amendment_deadline;
mod s4_veto_after_finalize;
mod s5_invite_then_command;
mod s6_bounce_suppression;
