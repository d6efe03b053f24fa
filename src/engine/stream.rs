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

//! The background stream queue. Only the head item is ever bound to the stream voice.

use std::collections::VecDeque;

use tracing::debug;

use crate::audio::VoiceState;

/// Most streams that can wait in the queue.
pub const QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueItem {
    /// Index of the stream in the bank.
    pub stream: usize,
    /// Seconds until the item may start.
    pub delay: f32,
    /// Seconds a waiting item survives. Zero waits forever.
    pub expiration: f32,
    pub playing: bool,
}

/// What happened to the queue during a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The head finished; the stream voice must be stopped and unbound.
    Finished(usize),
    /// The head must be bound to the stream voice and played.
    Start(usize),
    /// A waiting item expired unplayed.
    Expired(usize),
}

#[derive(Debug, Default)]
pub struct StreamQueue {
    items: VecDeque<QueueItem>,
}

impl StreamQueue {
    pub fn new() -> StreamQueue {
        StreamQueue {
            items: VecDeque::with_capacity(QUEUE_CAPACITY),
        }
    }

    /// Appends a stream. Returns false, dropping the request, when the queue is full.
    pub fn enqueue(&mut self, stream: usize, delay: f32, expiration: f32) -> bool {
        if self.items.len() >= QUEUE_CAPACITY {
            debug!(stream, "Stream queue full, dropping request.");
            return false;
        }
        self.items.push_back(QueueItem {
            stream,
            delay,
            expiration,
            playing: false,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn head(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Empties the queue. Returns true if the head was playing.
    pub fn clear(&mut self) -> bool {
        let playing = self.head().is_some_and(|item| item.playing);
        self.items.clear();
        playing
    }

    /// Advances timers by `dt`. `voice` is the stream voice's state at the start of the frame.
    ///
    /// Position in the queue is counted as items are visited, so when the head finishes the
    /// next item still counts as waiting for the rest of the frame and starts on the next.
    pub fn update(&mut self, dt: f32, voice: VoiceState) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        let mut position = 0;
        let mut index = 0;

        while index < self.items.len() {
            let is_head = position == 0;
            position += 1;
            let item = &mut self.items[index];

            if is_head && item.playing {
                if !matches!(voice, VoiceState::Initial | VoiceState::Playing) {
                    events.push(QueueEvent::Finished(item.stream));
                    self.items.remove(index);
                    continue;
                }
            } else if item.delay > 0.0 {
                item.delay = (item.delay - dt).max(0.0);
            }

            if is_head && item.delay == 0.0 && !item.playing {
                item.playing = true;
                events.push(QueueEvent::Start(item.stream));
                index += 1;
                continue;
            }

            if !is_head && item.expiration > 0.0 {
                item.expiration -= dt;
                if item.expiration <= 0.0 {
                    events.push(QueueEvent::Expired(item.stream));
                    self.items.remove(index);
                    continue;
                }
            }
            index += 1;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_plays_and_waits() {
        let mut queue = StreamQueue::new();
        assert!(queue.enqueue(0, 0.0, 0.0));
        assert!(queue.enqueue(1, 0.0, 0.0));

        assert_eq!(queue.update(0.1, VoiceState::Initial), vec![QueueEvent::Start(0)]);
        assert!(queue.update(0.1, VoiceState::Playing).is_empty());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_next_item_starts_one_frame_after_head_finishes() {
        let mut queue = StreamQueue::new();
        queue.enqueue(0, 0.0, 0.0);
        queue.enqueue(1, 0.0, 0.0);
        queue.update(0.1, VoiceState::Initial);

        assert_eq!(queue.update(0.1, VoiceState::Stopped), vec![QueueEvent::Finished(0)]);
        assert_eq!(queue.head().map(|item| item.playing), Some(false));
        assert_eq!(queue.update(0.1, VoiceState::Stopped), vec![QueueEvent::Start(1)]);
    }

    #[test]
    fn test_waiting_item_expires_but_head_never_does() {
        let mut queue = StreamQueue::new();
        queue.enqueue(0, 0.0, 0.1);
        queue.enqueue(1, 0.0, 0.25);

        assert_eq!(queue.update(0.1, VoiceState::Initial), vec![QueueEvent::Start(0)]);
        assert!(queue.update(0.1, VoiceState::Playing).is_empty());
        assert_eq!(
            queue.update(0.1, VoiceState::Playing),
            vec![QueueEvent::Expired(1)]
        );
        assert_eq!(queue.len(), 1);
        assert!(queue.update(10.0, VoiceState::Playing).is_empty());
        assert_eq!(queue.head().map(|item| item.stream), Some(0));
    }

    #[test]
    fn test_zero_expiration_waits_forever() {
        let mut queue = StreamQueue::new();
        queue.enqueue(0, 0.0, 0.0);
        queue.enqueue(1, 0.0, 0.0);
        queue.update(0.1, VoiceState::Initial);
        for _ in 0..100 {
            queue.update(1.0, VoiceState::Playing);
        }
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_head_delay() {
        let mut queue = StreamQueue::new();
        queue.enqueue(4, 0.25, 0.0);
        assert!(queue.update(0.1, VoiceState::Initial).is_empty());
        assert!(queue.update(0.1, VoiceState::Initial).is_empty());
        assert_eq!(queue.update(0.1, VoiceState::Initial), vec![QueueEvent::Start(4)]);
    }

    #[test]
    fn test_capacity() {
        let mut queue = StreamQueue::new();
        for stream in 0..QUEUE_CAPACITY {
            assert!(queue.enqueue(stream, 0.0, 0.0));
        }
        assert!(!queue.enqueue(99, 0.0, 0.0));
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        queue.update(0.1, VoiceState::Initial);
        assert!(queue.clear());
        assert!(queue.is_empty());
    }
}
