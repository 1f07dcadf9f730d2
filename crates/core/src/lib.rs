//! # depoview
//!
//! Client-side core for streaming molecular deposition trajectories.
//!
//! A deposition job runs on a remote server and is downloaded one segment at
//! a time over a socket. This crate holds everything about that exchange that
//! does not touch the network: the binary segment codec, the sequential
//! segment pull, the job status derivation and the film roughness analysis
//! run on the last frame of a completed job.
//!
//! ## Quick Start
//!
//! ```
//! use depoview::prelude::*;
//!
//! let mut session = Session::new(FlowTiming::default());
//! session.on_connected();
//!
//! let mut config = Configuration::default();
//! config.set_ratio("TPD", 1);
//! let commands = session.submit(&config).unwrap();
//! assert!(matches!(commands.last(), Some(Command::Send(ClientMessage::Submit(_)))));
//!
//! session.on_text("queued");
//! assert_eq!(session.status(), JobStatus::Queued);
//! ```
//!
//! ## Feature Flags
//!
//! - `parallel`: Bin particles across threads via rayon when computing height maps
//!
//! ## Modules
//!
//! - [`session`]: Event reducer tying the modules below together
//! - [`codec`]: Segment wire format
//! - [`flow`]: Sequential segment requests
//! - [`heightmap`]: Surface height map and roughness
//! - [`archive`]: Local trajectory files

#[path = "core/archive.rs"]
pub mod archive;

#[path = "core/codec.rs"]
pub mod codec;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/flow.rs"]
pub mod flow;

#[path = "core/heightmap.rs"]
pub mod heightmap;

#[path = "core/protocol.rs"]
pub mod protocol;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/species.rs"]
pub mod species;

#[path = "core/status.rs"]
pub mod status;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/trajectory.rs"]
pub mod trajectory;

/// Prelude module for convenient imports.
///
/// ```
/// use depoview::prelude::*;
/// ```
pub mod prelude {
    pub use crate::archive::{load_trajectory, ArchiveError, ArchiveReader, ArchiveWriter};
    pub use crate::codec::{decode_segment, encode_segment, encode_submission, CodecError, Segment};
    pub use crate::config::{
        ComponentCatalog, ComponentInfo, ConfigError, Configuration, MixtureComponent,
        SettingRange,
    };
    pub use crate::heightmap::{compute_height_map, Footprint, HeightMap};
    pub use crate::protocol::{ClientMessage, ServerMessage};
    pub use crate::session::{Command, Event, FlowTiming, Session, SubmitRejection, Timer};
    pub use crate::status::JobStatus;
    pub use crate::trajectory::{AnalysisFrame, Frame, FrameSink, Position, Trajectory};
}
