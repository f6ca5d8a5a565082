//! Lazy pagination over buckets, file names and file versions.
//!
//! A [`Paginator`] pulls one page at a time from a [`PageSource`] and only asks for the next page
//! once every item of the current one has been handed out. A page without a continuation cursor
//! ends the sequence.

use std::collections::VecDeque;

use async_trait::async_trait;
use b2_types::{
    Bucket, FileVersion, ListBucketsRequest, ListBucketsResponse, ListFileNamesRequest, ListFileNamesResponse,
    ListFileVersionsRequest, ListFileVersionsResponse,
};
use futures::Stream;
use tracing::debug;

use crate::error::TransportError;
use crate::http_client::Transport;

/// One page of results and the cursor of the page after it, if any.
pub struct Page<T, C> {
    pub items: Vec<T>,
    pub next: Option<C>,
}

#[async_trait]
pub trait PageSource: Send {
    type Item: Send;
    type Cursor: Send;

    /// Fetches the page starting at `cursor`, or the first page when `cursor` is `None`.
    async fn fetch(&mut self, cursor: Option<Self::Cursor>) -> Result<Page<Self::Item, Self::Cursor>, TransportError>;
}

enum PaginatorState<C> {
    Start,
    More(C),
    Done,
}

pub struct Paginator<S: PageSource> {
    source: S,
    buffer: VecDeque<S::Item>,
    state: PaginatorState<S::Cursor>,
    pages_fetched: usize,
}

impl<S: PageSource> Paginator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            buffer: VecDeque::new(),
            state: PaginatorState::Start,
            pages_fetched: 0,
        }
    }

    /// The next item, fetching another page only if the current one is used up.
    pub async fn next(&mut self) -> Result<Option<S::Item>, TransportError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }

            let cursor = match std::mem::replace(&mut self.state, PaginatorState::Done) {
                PaginatorState::Done => return Ok(None),
                PaginatorState::Start => None,
                PaginatorState::More(c) => Some(c),
            };

            let page = self.source.fetch(cursor).await?;
            self.pages_fetched += 1;
            debug!(page = self.pages_fetched, items = page.items.len(), more = page.next.is_some(), "fetched listing page");

            self.buffer.extend(page.items);
            if let Some(next) = page.next {
                self.state = PaginatorState::More(next);
            }
        }
    }

    /// Reads everything that is left into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<S::Item>, TransportError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await? {
            out.push(item);
        }
        Ok(out)
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<S::Item, TransportError>> + Send
    where
        S: 'static,
        S::Item: 'static,
        S::Cursor: 'static,
    {
        futures::stream::try_unfold(self, |mut paginator| async move {
            Ok(paginator.next().await?.map(|item| (item, paginator)))
        })
    }
}

/// `b2_list_buckets` returns every bucket at once; it is a single page.
pub struct BucketPages {
    transport: Transport,
    bucket_name: Option<String>,
}

impl BucketPages {
    pub fn new(transport: Transport, bucket_name: Option<String>) -> Self {
        Self { transport, bucket_name }
    }
}

#[async_trait]
impl PageSource for BucketPages {
    type Item = Bucket;
    type Cursor = ();

    async fn fetch(&mut self, _cursor: Option<()>) -> Result<Page<Bucket, ()>, TransportError> {
        let session = self.transport.session().await?;
        let request = ListBucketsRequest {
            account_id: session.account_id.clone(),
            bucket_name: self.bucket_name.clone(),
        };
        let response: ListBucketsResponse = self.transport.call_api("b2_list_buckets", &request).await?;
        Ok(Page {
            items: response.buckets,
            next: None,
        })
    }
}

pub struct FileNamePages {
    transport: Transport,
    request: ListFileNamesRequest,
}

impl FileNamePages {
    pub fn new(transport: Transport, bucket_id: String, prefix: Option<String>, page_size: u32) -> Self {
        Self {
            transport,
            request: ListFileNamesRequest {
                bucket_id,
                prefix,
                max_file_count: Some(page_size),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PageSource for FileNamePages {
    type Item = FileVersion;
    type Cursor = String;

    async fn fetch(&mut self, cursor: Option<String>) -> Result<Page<FileVersion, String>, TransportError> {
        self.request.start_file_name = cursor;
        let response: ListFileNamesResponse = self.transport.call_api("b2_list_file_names", &self.request).await?;
        Ok(Page {
            items: response.files,
            next: response.next_file_name,
        })
    }
}

/// Continuation of a version listing: the name and id of the first version of the next page.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionCursor {
    pub file_name: String,
    pub file_id: Option<String>,
}

pub struct FileVersionPages {
    transport: Transport,
    request: ListFileVersionsRequest,
}

impl FileVersionPages {
    pub fn new(transport: Transport, bucket_id: String, prefix: Option<String>, page_size: u32) -> Self {
        Self {
            transport,
            request: ListFileVersionsRequest {
                bucket_id,
                prefix,
                max_file_count: Some(page_size),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PageSource for FileVersionPages {
    type Item = FileVersion;
    type Cursor = VersionCursor;

    async fn fetch(&mut self, cursor: Option<VersionCursor>) -> Result<Page<FileVersion, VersionCursor>, TransportError> {
        let (name, id) = cursor.map(|c| (Some(c.file_name), c.file_id)).unwrap_or_default();
        self.request.start_file_name = name;
        self.request.start_file_id = id;

        let response: ListFileVersionsResponse =
            self.transport.call_api("b2_list_file_versions", &self.request).await?;
        let next = response.next_file_name.map(|file_name| VersionCursor {
            file_name,
            file_id: response.next_file_id,
        });
        Ok(Page {
            items: response.files,
            next,
        })
    }
}
