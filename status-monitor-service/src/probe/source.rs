// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Source engine A2S query over UDP.

use std::collections::BTreeMap;

use async_trait::async_trait;
use monitor_common::{ProbeFailure, ServerConfig, ServerSnapshot};
use tokio::net::UdpSocket;
use tracing::debug;

use super::Probe;

const SINGLE_PACKET: i32 = -1;
const SPLIT_PACKET: i32 = -2;
const A2S_INFO: u8 = 0x54;
const A2S_PLAYER: u8 = 0x55;
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;
const S2A_PLAYER: u8 = 0x44;
const RECV_BUFFER: usize = 4096;
const NO_CHALLENGE: [u8; 4] = [0xFF; 4];

#[derive(Debug, Clone, PartialEq, Eq)]
struct InfoReply {
    name: String,
    map: String,
    players: u8,
    max_players: u8,
}

/// Little-endian cursor over a reply payload.
struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], ProbeFailure> {
        let end = self.pos + N;
        let bytes: [u8; N] = self
            .data
            .get(self.pos..end)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| ProbeFailure::Malformed("truncated packet".to_string()))?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, ProbeFailure> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ProbeFailure> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, ProbeFailure> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn f32(&mut self) -> Result<f32, ProbeFailure> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    fn cstring(&mut self) -> Result<String, ProbeFailure> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or_else(|| ProbeFailure::Malformed("unterminated string".to_string()))?;
        let value = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(value)
    }

    fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }
}

fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut request = SINGLE_PACKET.to_le_bytes().to_vec();
    request.push(A2S_INFO);
    request.extend_from_slice(b"Source Engine Query\0");
    if let Some(challenge) = challenge {
        request.extend_from_slice(&challenge);
    }
    request
}

fn player_request(challenge: [u8; 4]) -> Vec<u8> {
    let mut request = SINGLE_PACKET.to_le_bytes().to_vec();
    request.push(A2S_PLAYER);
    request.extend_from_slice(&challenge);
    request
}

/// Reassembles split replies; yields the payload after the single-packet header.
#[derive(Default)]
struct SplitAssembler {
    expected: Option<(i32, u8)>,
    fragments: BTreeMap<u8, Vec<u8>>,
}

impl SplitAssembler {
    fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>, ProbeFailure> {
        let mut reader = PacketReader::new(packet);
        match reader.i32()? {
            SINGLE_PACKET => Ok(Some(reader.remaining().to_vec())),
            SPLIT_PACKET => {
                let id = reader.i32()?;
                if id < 0 {
                    return Err(ProbeFailure::Malformed(
                        "compressed split replies are not supported".to_string(),
                    ));
                }
                let total = reader.u8()?;
                let number = reader.u8()?;
                let _size = reader.u16()?;
                if total == 0 || number >= total {
                    return Err(ProbeFailure::Malformed(format!(
                        "split fragment {number} of {total}"
                    )));
                }
                match self.expected {
                    Some((expected_id, _)) if expected_id != id => {
                        return Err(ProbeFailure::Malformed(
                            "split reply ids do not match".to_string(),
                        ));
                    }
                    Some(_) => {}
                    None => self.expected = Some((id, total)),
                }
                self.fragments.insert(number, reader.remaining().to_vec());
                if self.fragments.len() < usize::from(total) {
                    return Ok(None);
                }

                let joined: Vec<u8> = std::mem::take(&mut self.fragments)
                    .into_values()
                    .flatten()
                    .collect();
                let mut joined_reader = PacketReader::new(&joined);
                if joined_reader.i32()? != SINGLE_PACKET {
                    return Err(ProbeFailure::Malformed(
                        "reassembled reply lacks header".to_string(),
                    ));
                }
                Ok(Some(joined_reader.remaining().to_vec()))
            }
            other => Err(ProbeFailure::Malformed(format!(
                "unknown packet header {other:#x}"
            ))),
        }
    }
}

async fn exchange(socket: &UdpSocket, request: &[u8]) -> Result<Vec<u8>, ProbeFailure> {
    socket.send(request).await.map_err(connect_failure)?;
    let mut assembler = SplitAssembler::default();
    let mut buf = vec![0_u8; RECV_BUFFER];
    loop {
        let len = socket.recv(&mut buf).await.map_err(connect_failure)?;
        if let Some(payload) = assembler.push(buf.get(..len).unwrap_or_default())? {
            return Ok(payload);
        }
    }
}

fn connect_failure(error: std::io::Error) -> ProbeFailure {
    ProbeFailure::Connect(error.to_string())
}

fn decode_info(payload: &[u8]) -> Result<InfoReply, ProbeFailure> {
    let mut reader = PacketReader::new(payload);
    let header = reader.u8()?;
    if header != S2A_INFO {
        return Err(ProbeFailure::UnexpectedSchema(format!(
            "expected info reply, got {header:#x}"
        )));
    }
    let _protocol = reader.u8()?;
    let name = reader.cstring()?;
    let map = reader.cstring()?;
    let _folder = reader.cstring()?;
    let _game = reader.cstring()?;
    let _app_id = reader.u16()?;
    let players = reader.u8()?;
    let max_players = reader.u8()?;
    Ok(InfoReply {
        name,
        map,
        players,
        max_players,
    })
}

fn decode_players(payload: &[u8]) -> Result<Vec<String>, ProbeFailure> {
    let mut reader = PacketReader::new(payload);
    let header = reader.u8()?;
    if header != S2A_PLAYER {
        return Err(ProbeFailure::UnexpectedSchema(format!(
            "expected player reply, got {header:#x}"
        )));
    }
    let count = reader.u8()?;
    let mut names = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let _index = reader.u8()?;
        let name = reader.cstring()?;
        let _score = reader.i32()?;
        let _duration = reader.f32()?;
        names.push(name);
    }
    Ok(names)
}

fn challenge_of(payload: &[u8]) -> Option<[u8; 4]> {
    let mut reader = PacketReader::new(payload);
    match reader.u8() {
        Ok(S2C_CHALLENGE) => reader.take::<4>().ok(),
        _ => None,
    }
}

async fn request_info(socket: &UdpSocket) -> Result<InfoReply, ProbeFailure> {
    let mut payload = exchange(socket, &info_request(None)).await?;
    if let Some(challenge) = challenge_of(&payload) {
        payload = exchange(socket, &info_request(Some(challenge))).await?;
    }
    decode_info(&payload)
}

async fn request_players(socket: &UdpSocket) -> Result<Vec<String>, ProbeFailure> {
    let mut payload = exchange(socket, &player_request(NO_CHALLENGE)).await?;
    if let Some(challenge) = challenge_of(&payload) {
        payload = exchange(socket, &player_request(challenge)).await?;
    }
    decode_players(&payload)
}

/// Adapter for [`monitor_common::ServerKind::ProcessQuery`] servers.
pub struct SourceQueryProbe;

#[async_trait]
impl Probe for SourceQueryProbe {
    async fn query(&self, server: &ServerConfig) -> Result<ServerSnapshot, ProbeFailure> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(connect_failure)?;
        socket
            .connect((server.host.as_str(), server.port))
            .await
            .map_err(connect_failure)?;

        let info = request_info(&socket).await?;
        let roster = match request_players(&socket).await {
            Ok(roster) => roster,
            Err(failure) => {
                debug!(server = %server.name, failure = %failure, "player list unavailable");
                Vec::new()
            }
        };
        debug!(server = %server.name, reported_name = %info.name, map = %info.map, "source query answered");

        let player_count = if roster.is_empty() {
            u32::from(info.players)
        } else {
            u32::try_from(roster.len()).unwrap_or(u32::MAX)
        };
        Ok(ServerSnapshot {
            online: true,
            player_count,
            max_players: u32::from(info.max_players),
            map_name: Some(info.map).filter(|map| !map.is_empty()),
            roster,
            display_name: server.name.clone(),
            probe_error: None,
        })
    }
}
