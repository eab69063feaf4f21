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

//! Minecraft Server List Ping over TCP.

use async_trait::async_trait;
use monitor_common::{ProbeFailure, ServerConfig, ServerSnapshot};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::Probe;

const STATUS_PACKET_ID: i32 = 0x00;
const NEXT_STATE_STATUS: i32 = 1;
const UNKNOWN_PROTOCOL_VERSION: i32 = -1;
const MAX_RESPONSE_LEN: i32 = 1 << 20;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    players: Option<StatusPlayers>,
}

#[derive(Debug, Deserialize)]
struct StatusPlayers {
    online: u32,
    max: u32,
    #[serde(default)]
    sample: Vec<SamplePlayer>,
}

#[derive(Debug, Deserialize)]
struct SamplePlayer {
    #[serde(default)]
    name: String,
}

fn write_varint(out: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_varint(out, value.len() as i32);
    out.extend_from_slice(value.as_bytes());
}

fn framed(body: Vec<u8>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(body.len() + 5);
    write_varint(&mut packet, body.len() as i32);
    packet.extend(body);
    packet
}

fn handshake_and_status_request(host: &str, port: u16) -> Vec<u8> {
    let mut handshake = Vec::new();
    write_varint(&mut handshake, STATUS_PACKET_ID);
    write_varint(&mut handshake, UNKNOWN_PROTOCOL_VERSION);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, NEXT_STATE_STATUS);

    let mut request = framed(handshake);
    request.extend(framed(vec![STATUS_PACKET_ID as u8]));
    request
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProbeFailure> {
    let mut value: u32 = 0;
    for position in 0..5 {
        let byte = reader
            .read_u8()
            .await
            .map_err(|error| ProbeFailure::Malformed(error.to_string()))?;
        value |= u32::from(byte & 0x7F) << (7 * position);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeFailure::Malformed("varint longer than 5 bytes".to_string()))
}

async fn read_status_json<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ProbeFailure> {
    let length = read_varint(reader).await?;
    if length <= 0 || length > MAX_RESPONSE_LEN {
        return Err(ProbeFailure::Malformed(format!("packet length {length}")));
    }
    let mut body = vec![0_u8; length as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|error| ProbeFailure::Malformed(error.to_string()))?;

    let mut cursor = body.as_slice();
    let packet_id = read_varint(&mut cursor).await?;
    if packet_id != STATUS_PACKET_ID {
        return Err(ProbeFailure::UnexpectedSchema(format!(
            "unexpected packet id {packet_id}"
        )));
    }
    let json_len = read_varint(&mut cursor).await?;
    let json = usize::try_from(json_len)
        .ok()
        .and_then(|len| cursor.get(..len))
        .ok_or_else(|| ProbeFailure::Malformed("status string overruns packet".to_string()))?;
    String::from_utf8(json.to_vec()).map_err(|error| ProbeFailure::Malformed(error.to_string()))
}

fn snapshot_from_status(server: &ServerConfig, raw: &str) -> Result<ServerSnapshot, ProbeFailure> {
    let status: StatusResponse = serde_json::from_str(raw)
        .map_err(|error| ProbeFailure::Malformed(error.to_string()))?;
    let players = status
        .players
        .ok_or_else(|| ProbeFailure::UnexpectedSchema("status lacks players".to_string()))?;
    Ok(ServerSnapshot {
        online: true,
        player_count: players.online,
        max_players: players.max,
        map_name: None,
        roster: players.sample.into_iter().map(|player| player.name).collect(),
        display_name: server.name.clone(),
        probe_error: None,
    })
}

/// Adapter for [`monitor_common::ServerKind::GameQuery`] servers.
pub struct ServerListPingProbe;

#[async_trait]
impl Probe for ServerListPingProbe {
    async fn query(&self, server: &ServerConfig) -> Result<ServerSnapshot, ProbeFailure> {
        let mut stream = TcpStream::connect((server.host.as_str(), server.port))
            .await
            .map_err(|error| ProbeFailure::Connect(error.to_string()))?;
        stream
            .write_all(&handshake_and_status_request(&server.host, server.port))
            .await
            .map_err(|error| ProbeFailure::Connect(error.to_string()))?;
        let raw = read_status_json(&mut stream).await?;
        snapshot_from_status(server, &raw)
    }
}
