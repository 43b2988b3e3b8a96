//! Display-ordered pages with navigation links.

use serde::Serialize;

use eventline_core::{EventId, EventRecord, EventStoreResult, Stream};

use crate::event_store::Repository;
use crate::specification::{Direction, Specification, Start};

/// Where a page starts.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePosition {
    Head,
    After(EventId),
}

impl From<PagePosition> for Start {
    fn from(value: PagePosition) -> Self {
        match value {
            PagePosition::Head => Start::Head,
            PagePosition::After(id) => Start::After(id),
        }
    }
}

/// Parameters of one page request; also what every link points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLink {
    pub stream: Stream,
    pub position: PagePosition,
    pub direction: Direction,
    pub count: usize,
}

impl PageLink {
    pub fn new(stream: Stream, position: PagePosition, direction: Direction, count: usize) -> Self {
        Self {
            stream,
            position,
            direction,
            count,
        }
    }

    fn specification(&self) -> EventStoreResult<Specification> {
        let spec = Specification::new()
            .in_stream(self.stream.clone())
            .direction(self.direction)
            .limit(self.count)?;
        Ok(match self.position {
            PagePosition::Head => spec,
            PagePosition::After(id) => spec.from(id),
        })
    }

    fn to(&self, position: PagePosition, direction: Direction) -> Self {
        Self::new(self.stream.clone(), position, direction, self.count)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<PageLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<PageLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<PageLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<PageLink>,
}

/// One page of a stream, newest event first, plus links to the neighbouring pages.
///
/// `next` walks towards older events and `last` jumps to the oldest page; `prev` walks
/// towards newer events and `first` jumps to the newest page. A link is omitted when there
/// is nothing to show in its direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub events: Vec<EventRecord>,
    pub links: PageLinks,
}

impl Page {
    pub fn load<R>(repository: &R, request: &PageLink) -> EventStoreResult<Self>
    where
        R: Repository + ?Sized,
    {
        let mut events = repository.read(&request.specification()?)?;
        if request.direction == Direction::Forward {
            events.reverse();
        }

        let mut links = PageLinks::default();
        let (Some(newest), Some(oldest)) = (events.first(), events.last()) else {
            return Ok(Self { events, links });
        };
        let (newest, oldest) = (newest.event_id(), oldest.event_id());

        let probe = |from: EventId, direction: Direction| -> EventStoreResult<bool> {
            let spec = Specification::new()
                .in_stream(request.stream.clone())
                .direction(direction)
                .from(from)
                .limit(1)?;
            Ok(!repository.read(&spec)?.is_empty())
        };

        if probe(newest, Direction::Forward)? {
            links.prev = Some(request.to(PagePosition::After(newest), Direction::Forward));
            links.first = Some(request.to(PagePosition::Head, Direction::Backward));
        }
        if probe(oldest, Direction::Backward)? {
            links.next = Some(request.to(PagePosition::After(oldest), Direction::Backward));
            links.last = Some(request.to(PagePosition::Head, Direction::Forward));
        }

        Ok(Self { events, links })
    }
}

#[cfg(test)]
mod tests {
    use eventline_core::ExpectedVersion;
    use serde_json::json;

    use super::*;
    use crate::event_store::InMemoryRepository;

    /// Oldest first.
    fn seeded(n: usize) -> (InMemoryRepository, Vec<EventId>) {
        let repo = InMemoryRepository::new();
        let records: Vec<EventRecord> =
            (0..n).map(|_| EventRecord::new("DummyEvent", json!({}))).collect();
        let ids = records.iter().map(EventRecord::event_id).collect();
        repo.append_to_stream(records, &Stream::new("dummy").unwrap(), ExpectedVersion::Any)
            .unwrap();
        (repo, ids)
    }

    fn request(position: PagePosition, direction: Direction, count: usize) -> PageLink {
        PageLink::new(Stream::new("dummy").unwrap(), position, direction, count)
    }

    fn newest_first(ids: &[EventId]) -> Vec<EventId> {
        ids.iter().rev().copied().collect()
    }

    #[test]
    fn newest_page_links_to_older_pages_only() {
        let (repo, ids) = seeded(40);
        let first_page = newest_first(&ids)[..20].to_vec();

        let page = Page::load(&repo, &request(PagePosition::Head, Direction::Backward, 20)).unwrap();
        assert_eq!(
            page.events.iter().map(EventRecord::event_id).collect::<Vec<_>>(),
            first_page
        );
        assert_eq!(
            page.links,
            PageLinks {
                last: Some(request(PagePosition::Head, Direction::Forward, 20)),
                next: Some(request(
                    PagePosition::After(first_page[19]),
                    Direction::Backward,
                    20
                )),
                ..PageLinks::default()
            }
        );
    }

    #[test]
    fn oldest_page_is_displayed_newest_first() {
        let (repo, ids) = seeded(40);
        let last_page = newest_first(&ids)[20..].to_vec();

        let page = Page::load(&repo, &request(PagePosition::Head, Direction::Forward, 20)).unwrap();
        assert_eq!(
            page.events.iter().map(EventRecord::event_id).collect::<Vec<_>>(),
            last_page
        );
        assert_eq!(
            page.links,
            PageLinks {
                first: Some(request(PagePosition::Head, Direction::Backward, 20)),
                prev: Some(request(
                    PagePosition::After(last_page[0]),
                    Direction::Forward,
                    20
                )),
                ..PageLinks::default()
            }
        );
    }

    #[test]
    fn middle_page_has_all_links() {
        let (repo, ids) = seeded(41);
        let desc = newest_first(&ids);
        let next_page = &desc[20..40];

        let page = Page::load(
            &repo,
            &request(PagePosition::After(desc[19]), Direction::Backward, 20),
        )
        .unwrap();
        assert_eq!(page.events.len(), 20);
        assert_eq!(
            page.links,
            PageLinks {
                first: Some(request(PagePosition::Head, Direction::Backward, 20)),
                last: Some(request(PagePosition::Head, Direction::Forward, 20)),
                next: Some(request(
                    PagePosition::After(next_page[19]),
                    Direction::Backward,
                    20
                )),
                prev: Some(request(
                    PagePosition::After(next_page[0]),
                    Direction::Forward,
                    20
                )),
            }
        );
    }

    #[test]
    fn small_and_out_of_bounds_pages_have_no_links() {
        let (repo, _) = seeded(2);
        let page = Page::load(&repo, &request(PagePosition::Head, Direction::Backward, 20)).unwrap();
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.links, PageLinks::default());

        let (repo, ids) = seeded(40);
        let page = Page::load(
            &repo,
            &request(PagePosition::After(ids[0]), Direction::Backward, 20),
        )
        .unwrap();
        assert!(page.events.is_empty());
        assert_eq!(page.links, PageLinks::default());
    }
}
