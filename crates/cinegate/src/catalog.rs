//! Movie records, validation and the in-memory catalog.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Datelike, Utc};
use dashmap::DashMap;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{AppError, AppResult};
use crate::validation::{unique, Validator};

/// Earliest accepted release year.
pub const FIRST_FILM_YEAR: i32 = 1888;

const MAX_TITLE_BYTES: usize = 500;
const MAX_GENRES: usize = 5;
const MAX_PAGE: u32 = 10_000_000;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Movie running time in minutes, written as `"<n> mins"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Runtime(pub i32);

impl Serialize for Runtime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{} mins", self.0))
    }
}

impl<'de> Deserialize<'de> for Runtime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RuntimeVisitor;

        impl Visitor<'_> for RuntimeVisitor {
            type Value = Runtime;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string of the form \"<n> mins\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Runtime, E> {
                value
                    .strip_suffix(" mins")
                    .and_then(|n| n.parse::<i32>().ok())
                    .map(Runtime)
                    .ok_or_else(|| E::custom("invalid runtime format"))
            }
        }

        deserializer.deserialize_str(RuntimeVisitor)
    }
}

/// A movie as stored and returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Movie {
    /// Catalog ID.
    pub id: i64,
    /// Insertion time, kept internal.
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    /// Title.
    pub title: String,
    /// Release year.
    pub year: i32,
    /// Running time.
    pub runtime: Runtime,
    /// Genre tags.
    pub genres: Vec<String>,
    /// Incremented on every update.
    pub version: i32,
}

/// Request body for creating or patching a movie. Absent fields stay `None`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovieInput {
    /// Title.
    pub title: Option<String>,
    /// Release year.
    pub year: Option<i32>,
    /// Running time.
    pub runtime: Option<Runtime>,
    /// Genre tags.
    pub genres: Option<Vec<String>>,
}

impl MovieInput {
    /// Overwrites the fields of `movie` that this input carries.
    pub fn apply_to(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }

    /// Builds an unsaved movie. Missing fields are left zero so validation
    /// reports them.
    pub fn into_draft(self) -> Movie {
        let mut movie = Movie {
            id: 0,
            created_at: Utc::now(),
            title: String::new(),
            year: 0,
            runtime: Runtime::default(),
            genres: Vec::new(),
            version: 1,
        };
        self.apply_to(&mut movie);
        movie
    }
}

/// Checks a movie's fields.
pub fn validate_movie(v: &mut Validator, movie: &Movie) {
    v.check(!movie.title.is_empty(), "title", "must be provided");
    v.check(
        movie.title.len() <= MAX_TITLE_BYTES,
        "title",
        "must not be more than 500 bytes long",
    );

    v.check(movie.year != 0, "year", "must be provided");
    v.check(
        movie.year >= FIRST_FILM_YEAR,
        "year",
        "must be greater than 1888",
    );
    v.check(
        movie.year <= Utc::now().year(),
        "year",
        "must not be in the future",
    );

    v.check(movie.runtime.0 != 0, "runtime", "must be provided");
    v.check(movie.runtime.0 > 0, "runtime", "must be a positive integer");

    v.check(
        !movie.genres.is_empty(),
        "genres",
        "must contain at least 1 genre",
    );
    v.check(
        movie.genres.len() <= MAX_GENRES,
        "genres",
        "must not contain more than 5 genres",
    );
    v.check(
        unique(&movie.genres),
        "genres",
        "must not contain duplicate values",
    );
}

/// Column a listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    /// Catalog ID.
    Id,
    /// Title, compared case-sensitively.
    Title,
    /// Release year.
    Year,
    /// Running time.
    Runtime,
}

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    /// Primary column.
    pub column: SortColumn,
    /// Whether the primary column is descending.
    pub descending: bool,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            column: SortColumn::Id,
            descending: false,
        }
    }
}

impl Sort {
    /// Parses a sort key from the safelist, e.g. `year` or `-runtime`.
    pub fn parse(value: &str) -> Option<Self> {
        let (descending, name) = match value.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, value),
        };
        let column = match name {
            "id" => SortColumn::Id,
            "title" => SortColumn::Title,
            "year" => SortColumn::Year,
            "runtime" => SortColumn::Runtime,
            _ => return None,
        };
        Some(Self { column, descending })
    }

    fn compare(&self, a: &Movie, b: &Movie) -> CmpOrdering {
        let primary = match self.column {
            SortColumn::Id => a.id.cmp(&b.id),
            SortColumn::Title => a.title.cmp(&b.title),
            SortColumn::Year => a.year.cmp(&b.year),
            SortColumn::Runtime => a.runtime.cmp(&b.runtime),
        };
        let primary = if self.descending {
            primary.reverse()
        } else {
            primary
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Listing filters, pagination and order taken from the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filters {
    /// Case-insensitive title substring.
    pub title: Option<String>,
    /// Genres that must all be present.
    pub genres: Vec<String>,
    /// 1-based page number.
    pub page: u32,
    /// Records per page.
    pub page_size: u32,
    /// Order.
    pub sort: Sort,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            title: None,
            genres: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            sort: Sort::default(),
        }
    }
}

impl Filters {
    /// Reads filters through `lookup`, usually [`RequestContext::query`].
    ///
    /// [`RequestContext::query`]: cinegate_core::RequestContext::query
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] naming every bad parameter.
    pub fn from_query<'a, F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut v = Validator::new();
        let mut filters = Self::default();

        filters.title = lookup("title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        filters.genres = lookup("genres")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(page) = read_int(&mut v, &lookup, "page") {
            filters.page = page;
        }
        if let Some(page_size) = read_int(&mut v, &lookup, "page_size") {
            filters.page_size = page_size;
        }
        if let Some(raw) = lookup("sort") {
            match Sort::parse(raw) {
                Some(sort) => filters.sort = sort,
                None => v.add_error("sort", "invalid sort value"),
            }
        }

        v.check(filters.page > 0, "page", "must be greater than zero");
        v.check(
            filters.page <= MAX_PAGE,
            "page",
            "must be a maximum of 10 million",
        );
        v.check(filters.page_size > 0, "page_size", "must be greater than zero");
        v.check(
            filters.page_size <= MAX_PAGE_SIZE,
            "page_size",
            "must be a maximum of 100",
        );

        v.finish()?;
        Ok(filters)
    }

    fn matches(&self, movie: &Movie) -> bool {
        let title_ok = self.title.as_ref().map_or(true, |needle| {
            movie
                .title
                .to_lowercase()
                .contains(&needle.to_lowercase())
        });
        title_ok
            && self
                .genres
                .iter()
                .all(|wanted| movie.genres.iter().any(|g| g.eq_ignore_ascii_case(wanted)))
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1) * self.page_size as usize
    }
}

fn read_int<'a, F>(v: &mut Validator, lookup: &F, key: &str) -> Option<u32>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let raw = lookup(key)?;
    match raw.parse::<u32>() {
        Ok(value) => Some(value),
        Err(_) => {
            v.add_error(key, "must be an integer value");
            None
        }
    }
}

/// Pagination details for a listing. Empty when nothing matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    /// Requested page.
    #[serde(skip_serializing_if = "is_zero")]
    pub current_page: u32,
    /// Requested page size.
    #[serde(skip_serializing_if = "is_zero")]
    pub page_size: u32,
    /// Always 1 for a non-empty result.
    #[serde(skip_serializing_if = "is_zero")]
    pub first_page: u32,
    /// Last page holding records.
    #[serde(skip_serializing_if = "is_zero")]
    pub last_page: u32,
    /// Records matching the filters across all pages.
    #[serde(skip_serializing_if = "is_zero")]
    pub total_records: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Metadata {
    /// Computes the metadata for `total_records` matches.
    pub fn calculate(total_records: usize, page: u32, page_size: u32) -> Self {
        if total_records == 0 || page_size == 0 {
            return Self::default();
        }
        let total = u32::try_from(total_records).unwrap_or(u32::MAX);
        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: total.div_ceil(page_size),
            total_records: total,
        }
    }
}

/// Concurrent in-memory movie catalog.
#[derive(Debug, Default)]
pub struct MovieCatalog {
    movies: DashMap<i64, Movie>,
    next_id: AtomicI64,
}

impl MovieCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a draft, assigning its ID, creation time and version 1.
    pub fn insert(&self, mut movie: Movie) -> Movie {
        movie.id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        movie.created_at = Utc::now();
        movie.version = 1;
        self.movies.insert(movie.id, movie.clone());
        movie
    }

    /// Returns a copy of the movie with `id`.
    pub fn get(&self, id: i64) -> Option<Movie> {
        self.movies.get(&id).map(|m| m.value().clone())
    }

    /// Writes `movie` back if the stored version still matches, bumping the
    /// version.
    ///
    /// # Errors
    ///
    /// [`AppError::EditConflict`] when the record changed or disappeared
    /// since it was read.
    pub fn update(&self, movie: &Movie) -> AppResult<Movie> {
        let mut stored = self
            .movies
            .get_mut(&movie.id)
            .ok_or(AppError::EditConflict)?;
        if stored.version != movie.version {
            return Err(AppError::EditConflict);
        }
        let mut updated = movie.clone();
        updated.created_at = stored.created_at;
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    /// Removes the movie with `id`, returning whether it existed.
    pub fn delete(&self, id: i64) -> bool {
        self.movies.remove(&id).is_some()
    }

    /// Number of stored movies.
    pub fn len(&self) -> usize {
        self.movies.len()
    }

    /// Returns `true` if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    /// Returns one page of matching movies and the pagination metadata.
    pub fn list(&self, filters: &Filters) -> (Vec<Movie>, Metadata) {
        let mut matching: Vec<Movie> = self
            .movies
            .iter()
            .filter(|entry| filters.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| filters.sort.compare(a, b));

        let metadata = Metadata::calculate(matching.len(), filters.page, filters.page_size);
        let page = matching
            .into_iter()
            .skip(filters.offset())
            .take(filters.page_size as usize)
            .collect();
        (page, metadata)
    }
}
