use crate::common::{SimError, SimResult};

/// Fixed number of simultaneously open DRAM pages.
#[derive(Clone, Debug)]
pub struct OpenPages {
    slots: Vec<Option<u64>>,
}

impl OpenPages {
    /// Creates `slots` empty page slots.
    pub fn new(slots: usize) -> Self {
        Self {
            slots: vec![None; slots],
        }
    }

    /// Returns `true` if `page` is open.
    pub fn is_open(&self, page: u64) -> bool {
        self.slots.contains(&Some(page))
    }

    /// Returns `true` if another page can be opened without closing one.
    pub fn has_free(&self) -> bool {
        self.slots.contains(&None)
    }

    /// Open pages in slot order.
    pub fn pages(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// Marks `page` open.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the page is already open or no slot is free.
    pub fn open(&mut self, page: u64) -> SimResult<()> {
        if self.is_open(page) {
            return Err(SimError::invariant("memory", format!("page {page:#x} is already open")));
        }
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or_else(|| SimError::invariant("memory", format!("no free slot to open page {page:#x}")))?;
        *slot = Some(page);
        Ok(())
    }

    /// Marks `page` closed.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the page is not open.
    pub fn close(&mut self, page: u64) -> SimResult<()> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| **s == Some(page))
            .ok_or_else(|| SimError::invariant("memory", format!("closing page {page:#x} which is not open")))?;
        *slot = None;
        Ok(())
    }

    /// Closes `page` under open-page management.
    ///
    /// # Arguments
    ///
    /// * `page` - Page to close.
    /// * `referenced` - Whether a queued request still targets the page.
    ///
    /// # Errors
    ///
    /// [`SimError::Invariant`] if the page is still referenced or not open.
    pub fn close_unreferenced(&mut self, page: u64, referenced: bool) -> SimResult<()> {
        if referenced {
            return Err(SimError::invariant(
                "memory",
                format!("closing page {page:#x} while a queued request still targets it"),
            ));
        }
        self.close(page)
    }

    /// First open page for which `referenced` is `false`.
    pub fn victim(&self, mut referenced: impl FnMut(u64) -> bool) -> Option<u64> {
        self.pages().find(|&p| !referenced(p))
    }
}
