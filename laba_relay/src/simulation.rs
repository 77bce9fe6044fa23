// Simulation collaborator interface.
//
// The session client never owns game state. It describes what the network
// learned (a participant appeared, moved, left; the local id was assigned) as
// calls on this trait, queued as actions on a `DispatchQueue<dyn Simulation>`
// and run only when the simulation thread drains the queue. Implementations
// are plain single-threaded setters; nothing here needs `Sync`.
//
// Remote participants are addressed by relay-assigned id. The local
// participant starts under `PlayerId::UNASSIGNED` and is remapped in place by
// `rebind_local_id` once the relay's `ID_SET` arrives.

use laba_protocol::{PlayerId, Vec3};

use crate::dispatch::DispatchQueue;

pub trait Simulation {
    /// Spawn a remote participant. Called at most once per id between removals.
    fn add_participant(&mut self, id: PlayerId);

    fn remove_participant(&mut self, id: PlayerId);

    /// Overwrite a remote participant's absolute position.
    fn set_participant_position(&mut self, id: PlayerId, position: Vec3);

    /// Move a remote participant by `delta`.
    fn apply_participant_delta(&mut self, id: PlayerId, delta: Vec3);

    /// Current position of the locally controlled participant.
    fn local_position(&self) -> Vec3;

    /// The relay assigned the local participant `new_id`.
    fn rebind_local_id(&mut self, new_id: PlayerId);
}

/// Queue of actions destined for a simulation.
pub type SimQueue = DispatchQueue<dyn Simulation>;
