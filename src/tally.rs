use crate::model::{PageIndex, Participant, ParticipantId};

/// Result of tallying a checkpoint's scope members against a page index.
#[derive(Debug, Clone)]
pub struct ArrivalTally {
    /// No member remains behind the checkpoint; the caller is the last
    /// arriver.
    pub is_last: bool,
    /// Some member is parked exactly at the checkpoint with the wait flag
    /// set. Distinguishes "everyone already passed" from "everyone including
    /// me is stuck here".
    pub someone_waiting: bool,
    /// Members whose cursor is still behind the checkpoint.
    pub unvisited: Vec<ParticipantId>,
    /// Short "P3, P7" note naming the stragglers, produced only while at
    /// most `note_limit` remain. Cosmetic, for monitoring.
    pub waiting_note: Option<String>,
}

/// Partitions the scope's members into visited (cursor at or past the
/// checkpoint) and unvisited, and derives the completion verdict for the
/// caller.
pub fn tally_arrivals(
    members: &[Participant],
    page_index: PageIndex,
    note_limit: usize,
) -> ArrivalTally {
    let mut unvisited = Vec::new();
    let mut stragglers = Vec::new();
    let mut someone_waiting = false;

    for member in members {
        if member.page_index < page_index {
            unvisited.push(member.id);
            stragglers.push(member.display_label());
        } else if member.page_index == page_index && member.is_on_wait_page {
            someone_waiting = true;
        }
    }

    let waiting_note = if (1..=note_limit).contains(&unvisited.len()) {
        Some(stragglers.join(", "))
    } else {
        None
    };

    ArrivalTally {
        is_last: unvisited.is_empty(),
        someone_waiting,
        unvisited,
        waiting_note,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn member(id: ParticipantId, page_index: PageIndex, waiting: bool) -> Participant {
        Participant {
            id,
            session_id: 1,
            code: format!("code{id}"),
            label: None,
            id_in_session: id as i32,
            page_index,
            is_on_wait_page: waiting,
            last_request: Utc::now(),
            waiting_for: None,
        }
    }

    #[test]
    fn last_arriver_only_when_all_visited() {
        for arrived in 0..4 {
            let members: Vec<Participant> = (0..4)
                .map(|i| member(i + 1, if i < arrived { 5 } else { 4 }, false))
                .collect();
            let tally = tally_arrivals(&members, 5, 3);
            assert_eq!(tally.is_last, arrived == 4, "arrived = {arrived}");
            assert_eq!(tally.unvisited.len(), 4 - arrived as usize);
        }
        let members: Vec<Participant> = (0..4).map(|i| member(i + 1, 5, false)).collect();
        assert!(tally_arrivals(&members, 5, 3).is_last);
    }

    #[test]
    fn waiting_flag_requires_exact_page() {
        let members = vec![
            member(1, 5, true),
            member(2, 6, true), // already past; its stale flag does not count
            member(3, 5, false),
        ];
        let tally = tally_arrivals(&members, 5, 3);
        assert!(tally.someone_waiting);

        let passed = vec![member(1, 6, false), member(2, 7, false)];
        assert!(!tally_arrivals(&passed, 5, 3).someone_waiting);
    }

    #[test]
    fn note_names_few_stragglers_only() {
        let members = vec![
            member(1, 5, false),
            member(2, 3, false),
            member(3, 4, false),
        ];
        let tally = tally_arrivals(&members, 5, 3);
        assert_eq!(tally.waiting_note.as_deref(), Some("P2, P3"));

        // Too many stragglers: no note.
        let crowd: Vec<Participant> = (0..6).map(|i| member(i + 1, 0, false)).collect();
        assert!(tally_arrivals(&crowd, 5, 3).waiting_note.is_none());

        // Nobody left: no note either.
        let done: Vec<Participant> = (0..2).map(|i| member(i + 1, 5, false)).collect();
        assert!(tally_arrivals(&done, 5, 3).waiting_note.is_none());
    }
}
