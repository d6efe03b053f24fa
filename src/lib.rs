// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! A fixed-capacity positional sound-effect engine.
//!
//! Sounds come from a [`bank::SoundBank`] of samples, dynamic layered sounds, scripts and
//! background streams. The [`engine::Engine`] drives them through an [`audio::Device`].

pub mod audio;
pub mod bank;
pub mod codec;
pub mod config;
pub mod curve;
pub mod engine;
pub mod pitch;
