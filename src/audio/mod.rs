//! # Audio Module
//!
//! Per-guild playback for Jukebox Bot.
//!
//! ### [`queue`] - Guild Queue
//! - FIFO of resolved tracks plus the current one
//! - Loop modes (off / track / queue), logical volume and mute
//! - Pending playlist stubs waiting for background expansion
//!
//! ### [`player`] - Playback Driver
//! - One state record per guild in a concurrent map
//! - Advances the queue when a track ends, guarded against double starts
//! - Idle auto-disconnect and playlist expansion as cancellable tasks
//!
//! ### [`voice`] - Voice Backend
//! - Trait seam over the voice transport
//! - [`voice::SongbirdBackend`] streams over HTTP through Songbird and
//!   reports the end of each track through a oneshot channel
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let driver = PlaybackDriver::new(backend, resolver, notifier, DriverSettings::from(&config));
//!
//! driver.play_query(guild_id, voice_channel, "lofi beats", user_id, origin).await?;
//! driver.pause(guild_id)?;
//! driver.resume(guild_id)?;
//! driver.skip(guild_id)?;
//! ```

pub mod notify;
pub mod player;
pub mod queue;
pub mod voice;

#[cfg(test)]
pub mod testing;
