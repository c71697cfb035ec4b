// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-byte commands understood by the lock controller.

/// Commands sent to the remote controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Engage ("on").
    Engage,
    /// Release ("off").
    Release,
}

impl Command {
    pub fn byte(&self) -> u8 {
        match self {
            Self::Engage => b'a',
            Self::Release => b'b',
        }
    }

    /// Parse from a user-facing name (case insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "on" | "engage" => Some(Self::Engage),
            "off" | "release" => Some(Self::Release),
            _ => None,
        }
    }

    /// Command encoded by `byte`, if any.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'a' => Some(Self::Engage),
            b'b' => Some(Self::Release),
            _ => None,
        }
    }
}

impl From<Command> for Vec<u8> {
    fn from(command: Command) -> Self {
        vec![command.byte()]
    }
}
