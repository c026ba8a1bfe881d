// Copyright 2024 TAKKT Industrial & Packaging GmbH
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
//
// SPDX-License-Identifier: Apache-2.0

//! Conversions between the engine's readers and the AWS SDK's [`ByteStream`].

use crate::io::{
    BodyReader,
    PartReader,
};
use aws_sdk_s3::primitives::ByteStream;
use tokio_util::{
    bytes::{
        Bytes,
        BytesMut,
    },
    codec::{
        BytesCodec,
        Decoder,
        FramedRead,
    },
};

/// Frames the chunks read from a part as [`http_body::Frame`]s.
///
/// The SDK only accepts streaming bodies through the `http_body` crate, which requires the data to
/// be framed.
struct PartFrameCodec(BytesCodec);

impl Decoder for PartFrameCodec {
    type Item = http_body::Frame<Bytes>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.0.decode(src)?.map(|chunk| http_body::Frame::data(chunk.freeze())))
    }
}

pub(crate) trait ByteStreamExt {
    /// Streams a part into a request body without buffering it in memory.
    fn from_part_reader(reader: PartReader) -> ByteStream;

    fn into_body_reader(self) -> BodyReader;
}

impl ByteStreamExt for ByteStream {
    fn from_part_reader(reader: PartReader) -> ByteStream {
        let frames = FramedRead::new(reader, PartFrameCodec(BytesCodec::new()));
        ByteStream::from_body_1_x(http_body_util::StreamBody::new(frames))
    }

    fn into_body_reader(self) -> BodyReader {
        Box::pin(self.into_async_read())
    }
}
