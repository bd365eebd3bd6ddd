//! Serialization routines for application-defined state, requests and
//! replies, used by `bft::executable::Service` implementations and by
//! the `bft::log` checkpoint machinery.
//!
//! The wire encoding itself is explicitly out of scope for this
//! specification (spec §1: "the RPC transport's on-wire encoding
//! choice ... any reliable, ordered, authenticated unicast stream
//! suffices"); `bincode` is used here only because it is already a
//! dev-dependency of the teacher crate's demo binaries, and is the
//! natural default for a `serde`-based application payload.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::bft::error::*;

/// Associates a `Service`'s state, request and reply types, together
/// with how to serialize and deserialize each of them.
pub trait SharedData {
    type State: Serialize + for<'de> Deserialize<'de>;
    type Request: Serialize + for<'de> Deserialize<'de>;
    type Reply: Serialize + for<'de> Deserialize<'de>;

    fn serialize_state<W: Write>(w: W, state: &Self::State) -> Result<()>;
    fn deserialize_state<R: Read>(r: R) -> Result<Self::State>;

    fn serialize_request<W: Write>(w: W, request: &Self::Request) -> Result<()>;
    fn deserialize_request<R: Read>(r: R) -> Result<Self::Request>;

    fn serialize_reply<W: Write>(w: W, reply: &Self::Reply) -> Result<()>;
    fn deserialize_reply<R: Read>(r: R) -> Result<Self::Reply>;
}

/// A blanket `SharedData` backed by `bincode`, usable by any
/// `Service` whose state/request/reply types are plain `serde` types
/// with no custom wire format requirements.
pub struct BincodeData<S, O, P>(std::marker::PhantomData<(S, O, P)>);

impl<S, O, P> SharedData for BincodeData<S, O, P>
where
    S: Serialize + for<'de> Deserialize<'de>,
    O: Serialize + for<'de> Deserialize<'de>,
    P: Serialize + for<'de> Deserialize<'de>,
{
    type State = S;
    type Request = O;
    type Reply = P;

    fn serialize_state<W: Write>(w: W, state: &Self::State) -> Result<()> {
        bincode_serialize_into(w, state)
    }

    fn deserialize_state<R: Read>(r: R) -> Result<Self::State> {
        bincode_deserialize_from(r)
    }

    fn serialize_request<W: Write>(w: W, request: &Self::Request) -> Result<()> {
        bincode_serialize_into(w, request)
    }

    fn deserialize_request<R: Read>(r: R) -> Result<Self::Request> {
        bincode_deserialize_from(r)
    }

    fn serialize_reply<W: Write>(w: W, reply: &Self::Reply) -> Result<()> {
        bincode_serialize_into(w, reply)
    }

    fn deserialize_reply<R: Read>(r: R) -> Result<Self::Reply> {
        bincode_deserialize_from(r)
    }
}

// NOTE: kept as a single indirection point so swapping the concrete
// codec (e.g. for a length-prefixed framing) touches one place.
#[cfg(feature = "serialize_serde")]
fn bincode_serialize_into<W: Write, T: Serialize>(mut w: W, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value).wrapped(ErrorKind::CommunicationMessage)?;
    w.write_all(&bytes).wrapped(ErrorKind::CommunicationMessage)
}

#[cfg(feature = "serialize_serde")]
fn bincode_deserialize_from<R: Read, T: for<'de> Deserialize<'de>>(mut r: R) -> Result<T> {
    let mut bytes = Vec::new();
    r.read_to_end(&mut bytes)
        .wrapped(ErrorKind::CommunicationMessage)?;
    bincode::deserialize(&bytes).wrapped(ErrorKind::CommunicationMessage)
}
