//! Conversion between domain events and stored events.
//!
//! The mapper owns the state pipeline. On write the order is fixed:
//! serialize, then compress, then encrypt. Reads reverse it. Changing the
//! order would silently corrupt stored state, so it is not configurable.

use std::{marker::PhantomData, sync::Arc};

use thiserror::Error;

use crate::{
    cipher::{Cipher, CipherError},
    compressor::{CompressionError, Compressor},
    event::{EventSet, PayloadError},
    recorder::StoredEvent,
    transcoder::{DecodingError, EncodingError, JsonTranscoder},
};

/// Error raised while mapping between domain and stored events.
#[derive(Debug, Error)]
pub enum MapperError {
    /// The stored topic names no known domain event type. Deployment
    /// mismatch; fatal for the affected event.
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    /// The decoded payload does not fit the domain event type named by the
    /// topic.
    #[error("stored event incompatible with topic `{topic}`: {reason}")]
    Incompatible {
        /// The topic that was being rebuilt.
        topic: String,
        /// Why the payload was rejected.
        reason: String,
    },
    /// Payload serialization failed.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// Payload deserialization failed.
    #[error(transparent)]
    Decoding(#[from] DecodingError),
    /// The compression stage failed.
    #[error(transparent)]
    Compression(#[from] CompressionError),
    /// The encryption stage failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Converts between an application's domain events and [`StoredEvent`]s.
///
/// Thread-safe once configured: the pipeline stages are shared immutably.
pub struct Mapper<E> {
    transcoder: Arc<JsonTranscoder>,
    compressor: Option<Arc<dyn Compressor>>,
    cipher: Option<Arc<dyn Cipher>>,
    _events: PhantomData<fn() -> E>,
}

impl<E> Clone for Mapper<E> {
    fn clone(&self) -> Self {
        Self {
            transcoder: Arc::clone(&self.transcoder),
            compressor: self.compressor.clone(),
            cipher: self.cipher.clone(),
            _events: PhantomData,
        }
    }
}

impl<E> Default for Mapper<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Mapper<E> {
    /// A mapper with the default transcoder and no compression or
    /// encryption.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transcoder: Arc::new(JsonTranscoder::default()),
            compressor: None,
            cipher: None,
            _events: PhantomData,
        }
    }

    /// Replace the transcoder.
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: JsonTranscoder) -> Self {
        self.transcoder = Arc::new(transcoder);
        self
    }

    /// Compress serialized state.
    #[must_use]
    pub fn with_compressor<C>(mut self, compressor: C) -> Self
    where
        C: Compressor + 'static,
    {
        self.compressor = Some(Arc::new(compressor));
        self
    }

    /// Encrypt (possibly compressed) state.
    #[must_use]
    pub fn with_cipher<C>(mut self, cipher: C) -> Self
    where
        C: Cipher + 'static,
    {
        self.cipher = Some(Arc::new(cipher));
        self
    }
}

impl<E: EventSet> Mapper<E> {
    /// Convert a domain event to its stored form.
    ///
    /// # Errors
    ///
    /// Returns the failing pipeline stage's error; nothing is partially
    /// produced.
    pub fn to_stored(&self, event: &E) -> Result<StoredEvent, MapperError> {
        let payload = event
            .to_payload()
            .map_err(|error| EncodingError::UnsupportedType(error.to_string()))?;
        let mut state = self.transcoder.encode(payload)?;
        if let Some(compressor) = &self.compressor {
            state = compressor.compress(&state)?;
        }
        if let Some(cipher) = &self.cipher {
            state = cipher.encrypt(&state)?;
        }
        Ok(StoredEvent {
            originator_id: event.originator_id(),
            originator_version: event.originator_version(),
            topic: event.topic().to_string(),
            state,
        })
    }

    /// Rebuild a domain event from its stored form.
    ///
    /// The rebuilt event must agree with the stored row on originator id
    /// and version; a disagreement means the payload and the row describe
    /// different events.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::UnknownTopic`] when the topic names no type in
    /// the event set, [`MapperError::Incompatible`] when the payload does
    /// not fit, or the failing pipeline stage's error.
    pub fn to_domain(&self, stored: &StoredEvent) -> Result<E, MapperError> {
        if !E::TOPICS.contains(&stored.topic.as_str()) {
            return Err(MapperError::UnknownTopic(stored.topic.clone()));
        }

        let mut state = stored.state.clone();
        if let Some(cipher) = &self.cipher {
            state = cipher.decrypt(&state)?;
        }
        if let Some(compressor) = &self.compressor {
            state = compressor.decompress(&state)?;
        }
        let payload = self.transcoder.decode(&state)?;

        let event = E::from_payload(&stored.topic, payload).map_err(|error| match error {
            PayloadError::UnknownTopic { topic, .. } => MapperError::UnknownTopic(topic),
            PayloadError::Incompatible(source) => MapperError::Incompatible {
                topic: stored.topic.clone(),
                reason: source.to_string(),
            },
        })?;

        if event.originator_id() != stored.originator_id
            || event.originator_version() != stored.originator_version
        {
            return Err(MapperError::Incompatible {
                topic: stored.topic.clone(),
                reason: format!(
                    "payload places the event at ({}, {}) but the row says ({}, {})",
                    event.originator_id(),
                    event.originator_version(),
                    stored.originator_id,
                    stored.originator_version
                ),
            });
        }

        Ok(event)
    }
}
