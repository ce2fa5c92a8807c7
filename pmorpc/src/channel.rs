//! # Canal RPC à trames de longueur
//!
//! Chaque message est une suite de champs nommés. Un champ s'écrit sur le
//! fil comme une ligne d'en-tête `nom: <longueur>\n` suivie d'exactement
//! `<longueur>` octets bruts, sans aucun échappement : le contenu peut
//! contenir des sauts de ligne. Une ligne vide termine le message. Le
//! nombre de champs n'est jamais écrit explicitement : le terminateur
//! suffit.
//!
//! Deux noms de champ sont réservés par le protocole :
//! - [`PROC_FIELD`] porte le nom de la procédure invoquée côté requête ;
//! - [`STATUS_FIELD`] dans une réponse signale un échec applicatif, même si
//!   le transport a réussi.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

/// Nom réservé du champ portant la procédure à invoquer.
pub const PROC_FIELD: &str = "pmorpc:proc";

/// Nom réservé signalant un échec applicatif dans une réponse.
pub const STATUS_FIELD: &str = "pmorpcstatus";

/// Erreurs du canal. Toute variante autre qu'un message bien reçu signifie
/// que le flux est dans un état ambigu : l'appelant doit considérer le
/// worker comme mort.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("worker stream closed")]
    Closed,

    #[error("malformed frame header: {0:?}")]
    BadHeader(String),

    #[error("field `{name}` truncated: expected {expected} bytes, got {got}")]
    ShortRead {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("I/O error on worker channel: {0}")]
    Io(#[from] std::io::Error),
}

/// Requête ordonnée : les champs sont écrits sur le fil dans l'ordre où
/// l'appelant les a fournis.
#[derive(Debug, Clone, Default)]
pub struct RpcRequest {
    fields: Vec<(String, Vec<u8>)>,
}

impl RpcRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requête d'invocation : le champ procédure est toujours écrit en
    /// premier.
    pub fn procedure(name: &str) -> Self {
        let mut request = Self::new();
        request.push(PROC_FIELD, name.as_bytes().to_vec());
        request
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Variante chaînable de [`push`](Self::push).
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.push(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_slice()))
    }
}

/// Champs d'un message reçu. Un nom dupliqué sur le fil écrase la valeur
/// précédente : le dernier écrit gagne.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcFields {
    fields: HashMap<String, Vec<u8>>,
}

impl RpcFields {
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.fields.get(name).map(Vec::as_slice)
    }

    /// Valeur d'un champ vue comme texte UTF-8. `None` si le champ est
    /// absent ou si son contenu n'est pas de l'UTF-8 valide.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|value| std::str::from_utf8(value).ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insère ou écrase un champ. Exposé pour construire des réponses dans
    /// les mocks de test des crates clientes.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.fields.insert(name.into(), value.into());
    }
}

/// Canal bidirectionnel vers un pair parlant le protocole à trames.
///
/// Générique sur les deux moitiés du flux pour que les tests puissent le
/// brancher sur une paire [`tokio::io::duplex`] au lieu du stdin/stdout
/// d'un processus fils.
#[derive(Debug)]
pub struct RpcChannel<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl<R, W> RpcChannel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Écrit un message complet, terminateur compris, puis vide le tampon.
    pub async fn send(&mut self, request: &RpcRequest) -> Result<(), ChannelError> {
        for (name, value) in request.iter() {
            let header = format!("{}: {}\n", name, value.len());
            self.writer.write_all(header.as_bytes()).await?;
            self.writer.write_all(value).await?;
        }
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Lit un message complet. Les noms dupliqués écrasent la valeur déjà
    /// accumulée. Toute erreur laisse le flux dans un état indéfini.
    pub async fn receive(&mut self) -> Result<RpcFields, ChannelError> {
        let mut fields = RpcFields::default();
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                // EOF au milieu d'un message : le pair a disparu.
                return Err(ChannelError::Closed);
            }
            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }

            let mut tokens = header.split_whitespace();
            let (name, length) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(name), Some(length), None) => (name, length),
                _ => return Err(ChannelError::BadHeader(header.to_string())),
            };
            let length: usize = length
                .parse()
                .map_err(|_| ChannelError::BadHeader(header.to_string()))?;
            // L'en-tête s'écrit `nom: longueur` ; le deux-points appartient
            // à la syntaxe, pas au nom.
            let name = name.trim_end_matches(':').to_string();

            let mut value = vec![0u8; length];
            let mut got = 0;
            while got < length {
                let n = self.reader.read(&mut value[got..]).await?;
                if n == 0 {
                    return Err(ChannelError::ShortRead {
                        name,
                        expected: length,
                        got,
                    });
                }
                got += n;
            }

            trace!(field = %name, bytes = length, "frame field received");
            fields.insert(name, value);
        }
        Ok(fields)
    }

    /// Une requête, une réponse. L'appelant détient déjà l'exclusion par
    /// worker : rien d'autre ne peut s'intercaler entre les deux moitiés.
    pub async fn roundtrip(&mut self, request: &RpcRequest) -> Result<RpcFields, ChannelError> {
        self.send(request).await?;
        self.receive().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn pair() -> (
        RpcChannel<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        RpcChannel<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    ) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let (lr, lw) = tokio::io::split(left);
        let (rr, rw) = tokio::io::split(right);
        (RpcChannel::new(lr, lw), RpcChannel::new(rr, rw))
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_binary_payloads() {
        let (mut tx, mut rx) = pair();

        let mut request = RpcRequest::procedure("echo");
        request.push("data", b"line1\nline2\x00\xff".to_vec());
        request.push("empty", Vec::new());
        tx.send(&request).await.unwrap();

        let fields = rx.receive().await.unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields.get(PROC_FIELD), Some(&b"echo"[..]));
        assert_eq!(fields.get("data"), Some(&b"line1\nline2\x00\xff"[..]));
        assert_eq!(fields.get("empty"), Some(&b""[..]));
        assert_eq!(fields.text(PROC_FIELD), Some("echo"));
    }

    #[tokio::test]
    async fn test_wire_format_is_header_then_raw_bytes() {
        let (left, mut right) = tokio::io::duplex(1024);
        let (lr, lw) = tokio::io::split(left);
        let mut tx = RpcChannel::new(lr, lw);

        tx.send(&RpcRequest::procedure("browse"))
            .await
            .unwrap();

        let expected = b"pmorpc:proc: 6\nbrowse\n";
        let mut buf = vec![0u8; expected.len()];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, expected);
    }

    #[tokio::test]
    async fn test_duplicate_field_name_last_write_wins() {
        let (mut tx, mut rx) = pair();

        let request = RpcRequest::new()
            .field("value", b"first".to_vec())
            .field("value", b"second".to_vec());
        tx.send(&request).await.unwrap();

        let fields = rx.receive().await.unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("value"), Some(&b"second"[..]));
    }

    #[tokio::test]
    async fn test_empty_message_is_valid() {
        let mut rx = RpcChannel::new(&b"\n"[..], tokio::io::sink());
        let fields = rx.receive().await.unwrap();
        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_headers_are_rejected() {
        for raw in [
            &b"single-token\n"[..],
            &b"too many tokens 5\n"[..],
            &b"name: not-a-number\n"[..],
        ] {
            let mut rx = RpcChannel::new(raw, tokio::io::sink());
            match rx.receive().await {
                Err(ChannelError::BadHeader(_)) => {}
                other => panic!("expected BadHeader, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_short_payload_fails_with_declared_length() {
        let mut rx = RpcChannel::new(&b"data: 10\nabc"[..], tokio::io::sink());
        match rx.receive().await {
            Err(ChannelError::ShortRead {
                name,
                expected,
                got,
            }) => {
                assert_eq!(name, "data");
                assert_eq!(expected, 10);
                assert_eq!(got, 3);
            }
            other => panic!("expected ShortRead, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_terminator_reports_closed() {
        // Champ complet mais flux terminé avant la ligne vide.
        let mut rx = RpcChannel::new(&b"data: 3\nabc"[..], tokio::io::sink());
        match rx.receive().await {
            Err(ChannelError::Closed) => {}
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receive_tolerates_fragmented_reads() {
        // L'en-tête et la charge peuvent arriver en morceaux arbitraires.
        let reader = tokio_test::io::Builder::new()
            .read(b"da")
            .read(b"ta: 5\nhel")
            .read(b"lo")
            .read(b"\n")
            .build();
        let mut rx = RpcChannel::new(reader, tokio::io::sink());
        let fields = rx.receive().await.unwrap();
        assert_eq!(fields.get("data"), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn test_payload_may_contain_header_lookalikes() {
        let (mut tx, mut rx) = pair();

        // Un contenu qui ressemble à un en-tête ne doit pas être interprété.
        let tricky = b"fake: 99\n\nstill the same field".to_vec();
        let request = RpcRequest::new().field("blob", tricky.clone());
        tx.send(&request).await.unwrap();

        let fields = rx.receive().await.unwrap();
        assert_eq!(fields.get("blob"), Some(&tricky[..]));
    }
}
