//! Flux proxifiés : lecture, repositionnement et fermeture.
//!
//! Deux familles de sources. Les URLs HTTP se relisent à un offset
//! arbitraire via une requête Range ; les protocoles temps réel hérités
//! ne connaissent que le temps, et le repositionnement s'y traduit en
//! secondes à partir du débit annoncé par le backend.

use std::io::SeekFrom;

use async_trait::async_trait;
use reqwest::header;
use thiserror::Error;
use tracing::{debug, warn};

/// Taille maximale d'une lecture amont, quel que soit ce que demande
/// l'aval. Les gros tampons font caler les backends lents.
pub const READ_CHUNK: usize = 200 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Upstream fetch failed: {0}")]
    Upstream(String),

    #[error("Unsupported media URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Seek not supported: {0}")]
    SeekNotSupported(&'static str),

    #[error("Seek before start of stream")]
    InvalidSeek,

    #[error("Stream is closed")]
    Closed,
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Upstream(err.to_string())
    }
}

/// Connecteur d'un protocole de diffusion temps réel hérité.
///
/// `read` peut rendre moins d'octets que demandé sans que ce soit une
/// fin de flux ; seul un retour de 0 la signale. `reposition` reçoit un
/// temps absolu en secondes depuis le début de la piste.
#[async_trait]
pub trait RealtimeTransport: Send {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;
    async fn reposition(&mut self, seconds: u64) -> Result<(), StreamError>;
    async fn close(&mut self);
}

/// Source HTTP relue par requêtes Range.
#[derive(Debug)]
pub struct HttpStream {
    client: reqwest::Client,
    url: String,
    response: Option<reqwest::Response>,
    pending: Vec<u8>,
    offset: u64,
    length: Option<u64>,
}

impl HttpStream {
    pub async fn open(url: &str) -> Result<Self, StreamError> {
        let client = reqwest::Client::new();
        let response = client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(StreamError::Upstream(format!(
                "upstream returned {}",
                response.status()
            )));
        }
        let length = response.content_length();
        debug!(url = %url, length = ?length, "HTTP stream opened");

        Ok(Self {
            client,
            url: url.to_string(),
            response: Some(response),
            pending: Vec::new(),
            offset: 0,
            length,
        })
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Lecture en un coup : rend ce que l'amont livre, borné à
    /// [`READ_CHUNK`]. L'excédent d'un chunk amont reste en attente
    /// pour la lecture suivante.
    pub async fn read(&mut self, want: usize) -> Result<Vec<u8>, StreamError> {
        let want = want.min(READ_CHUNK);
        if want == 0 {
            return Ok(Vec::new());
        }
        if !self.pending.is_empty() {
            let out = take_pending(&mut self.pending, want);
            self.offset += out.len() as u64;
            return Ok(out);
        }

        let response = self.response.as_mut().ok_or(StreamError::Closed)?;
        match response.chunk().await? {
            Some(chunk) => {
                let mut data = chunk.to_vec();
                if data.len() > want {
                    self.pending = data.split_off(want);
                }
                self.offset += data.len() as u64;
                Ok(data)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Repositionne par une unique re-requête Range à l'offset cible.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        let target = absolute_offset(self.offset, self.length, pos)?;
        debug!(url = %self.url, offset = %target, "HTTP range refetch");

        let response = self
            .client
            .get(&self.url)
            .header(header::RANGE, format!("bytes={target}-"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StreamError::Upstream(format!(
                "range refetch returned {}",
                response.status()
            )));
        }

        self.response = Some(response);
        self.pending.clear();
        self.offset = target;
        Ok(target)
    }

    pub fn close(&mut self) {
        self.response = None;
        self.pending.clear();
    }
}

/// Source temps réel : lectures partielles bouclées, repositionnement
/// temporel calculé depuis le débit.
pub struct RealtimeStream {
    transport: Box<dyn RealtimeTransport>,
    kbps: Option<u32>,
    offset: u64,
    closed: bool,
}

impl RealtimeStream {
    pub fn new(transport: Box<dyn RealtimeTransport>, kbps: Option<u32>) -> Self {
        Self {
            transport,
            kbps,
            offset: 0,
            closed: false,
        }
    }

    /// Boucle sur le transport jusqu'à remplir la demande (bornée à
    /// [`READ_CHUNK`]) ou épuiser le flux.
    pub async fn read(&mut self, want: usize) -> Result<Vec<u8>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let want = want.min(READ_CHUNK);
        let mut buf = vec![0u8; want];
        let mut total = 0;
        while total < want {
            let n = self.transport.read(&mut buf[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        self.offset += total as u64;
        Ok(buf)
    }

    /// Traduit l'offset en octets vers un temps absolu en secondes :
    /// `octets / (kbps / 8)`. Sans débit connu, pas de repositionnement.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let target = absolute_offset(self.offset, None, pos)?;
        let bytes_per_second = match self.kbps {
            Some(kbps) if kbps / 8 > 0 => u64::from(kbps / 8),
            _ => return Err(StreamError::SeekNotSupported("stream bitrate unknown")),
        };
        let seconds = target / bytes_per_second;
        debug!(offset = %target, seconds = %seconds, "Realtime reposition");

        self.transport.reposition(seconds).await?;
        self.offset = target;
        Ok(target)
    }

    pub async fn close(&mut self) {
        if !self.closed {
            self.transport.close().await;
            self.closed = true;
        }
    }
}

/// Un flux média proxifié, quelle que soit la famille de source.
pub enum MediaStream {
    Http(HttpStream),
    Realtime(RealtimeStream),
}

// Pas de dérive : le transport temps réel est un objet de trait sans
// contrainte `Debug`.
impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaStream::Http(stream) => f.debug_tuple("Http").field(stream).finish(),
            MediaStream::Realtime(_) => f.debug_struct("Realtime").finish_non_exhaustive(),
        }
    }
}

impl MediaStream {
    pub async fn read(&mut self, want: usize) -> Result<Vec<u8>, StreamError> {
        match self {
            MediaStream::Http(stream) => stream.read(want).await,
            MediaStream::Realtime(stream) => stream.read(want).await,
        }
    }

    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        match self {
            MediaStream::Http(stream) => stream.seek(pos).await,
            MediaStream::Realtime(stream) => stream.seek(pos).await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            MediaStream::Http(stream) => stream.close(),
            MediaStream::Realtime(stream) => stream.close().await,
        }
    }

    pub fn length(&self) -> Option<u64> {
        match self {
            MediaStream::Http(stream) => stream.length(),
            MediaStream::Realtime(_) => None,
        }
    }
}

/// Ouvre l'URL résolue en flux proxifié.
///
/// Seul le HTTP a un connecteur câblé ici ; pour un schéma temps réel,
/// un [`RealtimeTransport`] doit être fourni par l'appelant via
/// [`RealtimeStream::new`].
pub async fn open_media(url: &str, _kbps: Option<u32>) -> Result<MediaStream, StreamError> {
    if url.starts_with("http") {
        Ok(MediaStream::Http(HttpStream::open(url).await?))
    } else {
        let scheme = url.split(':').next().unwrap_or_default().to_string();
        warn!(scheme = %scheme, "No realtime connector for media URL scheme");
        Err(StreamError::UnsupportedScheme(scheme))
    }
}

fn take_pending(pending: &mut Vec<u8>, want: usize) -> Vec<u8> {
    if want >= pending.len() {
        std::mem::take(pending)
    } else {
        let rest = pending.split_off(want);
        std::mem::replace(pending, rest)
    }
}

/// Résout une position de seek en offset absolu.
fn absolute_offset(
    current: u64,
    length: Option<u64>,
    pos: SeekFrom,
) -> Result<u64, StreamError> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset as i128),
        SeekFrom::Current(delta) => Some(current as i128 + delta as i128),
        SeekFrom::End(delta) => length.map(|len| len as i128 + delta as i128),
    };
    match target {
        Some(target) if target >= 0 => Ok(target as u64),
        Some(_) => Err(StreamError::InvalidSeek),
        None => Err(StreamError::SeekNotSupported("stream length unknown")),
    }
}
