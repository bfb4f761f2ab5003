//! Paged list shape used by infinite lists (feeds, message threads).

use serde::{Deserialize, Serialize};

/// One page of a cursor-paginated list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  #[serde(default)]
  pub next_cursor: Option<String>,
}

impl<T> Page<T> {
  pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
    Self { items, next_cursor }
  }
}

/// All pages loaded so far for one list identity, newest page first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedList<T> {
  pub pages: Vec<Page<T>>,
}

impl<T> Default for PagedList<T> {
  fn default() -> Self {
    Self { pages: Vec::new() }
  }
}

impl<T> PagedList<T> {
  pub fn from_page(page: Page<T>) -> Self {
    Self { pages: vec![page] }
  }

  pub fn items(&self) -> impl Iterator<Item = &T> {
    self.pages.iter().flat_map(|page| page.items.iter())
  }

  pub fn items_mut(&mut self) -> impl Iterator<Item = &mut T> {
    self.pages.iter_mut().flat_map(|page| page.items.iter_mut())
  }

  pub fn len(&self) -> usize {
    self.pages.iter().map(|page| page.items.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Insert at the head of the first page, creating it if needed.
  pub fn prepend(&mut self, item: T) {
    match self.pages.first_mut() {
      Some(page) => page.items.insert(0, item),
      None => self.pages.push(Page::new(vec![item], None)),
    }
  }

  pub fn map_items(mut self, mut f: impl FnMut(T) -> T) -> Self {
    for page in &mut self.pages {
      page.items = std::mem::take(&mut page.items).into_iter().map(&mut f).collect();
    }
    self
  }

  /// Keep only items matching the predicate. Returns the number removed.
  pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
    let before = self.len();
    for page in &mut self.pages {
      page.items.retain(&mut keep);
    }
    before - self.len()
  }

  pub fn append_page(&mut self, page: Page<T>) {
    self.pages.push(page);
  }

  pub fn next_cursor(&self) -> Option<&str> {
    self.pages.last().and_then(|page| page.next_cursor.as_deref())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_prepend_into_empty_list() {
    let mut list = PagedList::default();
    list.prepend(1);
    assert_eq!(list.len(), 1);
    assert_eq!(list.pages.len(), 1);
  }

  #[test]
  fn test_items_span_pages() {
    let mut list = PagedList::from_page(Page::new(vec![3, 2], Some("c1".into())));
    list.append_page(Page::new(vec![1], None));
    list.prepend(4);

    assert_eq!(list.items().copied().collect::<Vec<_>>(), vec![4, 3, 2, 1]);
    assert_eq!(list.next_cursor(), None);
  }

  #[test]
  fn test_retain_reports_removed() {
    let mut list = PagedList::from_page(Page::new(vec![1, 2, 3, 4], None));
    assert_eq!(list.retain(|n| n % 2 == 0), 2);
    assert_eq!(list.items().copied().collect::<Vec<_>>(), vec![2, 4]);
  }

  #[test]
  fn test_map_items_preserves_page_boundaries() {
    let mut list = PagedList::from_page(Page::new(vec![1, 2], Some("next".into())));
    list.append_page(Page::new(vec![3], None));
    let doubled = list.map_items(|n| n * 2);
    assert_eq!(doubled.pages[0].items, vec![2, 4]);
    assert_eq!(doubled.pages[1].items, vec![6]);
    assert_eq!(doubled.pages[0].next_cursor.as_deref(), Some("next"));
  }
}
