//! OrderedList : renumérotage en mémoire d'une playlist
//!
//! Toutes les opérations travaillent sur la liste complète d'une playlist,
//! chargée depuis le store. Les validations ont lieu avant toute mutation :
//! une opération refusée laisse la liste intacte. Les modifications ne sont
//! pas persistées ici ; [`OrderedList::into_batch`] calcule le lot à committer
//! en comparant l'état courant à l'état chargé.

use crate::error::Error;
use crate::ids::{PlaylistId, Position, SongId};
use crate::membership::{Membership, MembershipChange, PlaylistBatch, PlaylistSnapshot};
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Liste ordonnée des memberships d'une playlist
#[derive(Debug, Clone)]
pub struct OrderedList {
    playlist_id: PlaylistId,
    version: u64,
    memberships: Vec<Membership>,
    loaded: HashMap<SongId, Position>,
}

impl OrderedList {
    /// Construit la liste depuis un snapshot du store (triée par position)
    pub fn new(snapshot: PlaylistSnapshot) -> Self {
        let mut memberships = snapshot.memberships;
        memberships.sort_by_key(|m| m.position);
        let loaded = memberships
            .iter()
            .map(|m| (m.song_id, m.position))
            .collect();

        Self {
            playlist_id: snapshot.playlist_id,
            version: snapshot.version,
            memberships,
            loaded,
        }
    }

    pub fn playlist_id(&self) -> PlaylistId {
        self.playlist_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.memberships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }

    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    pub fn contains(&self, song_id: SongId) -> bool {
        self.memberships.iter().any(|m| m.song_id == song_id)
    }

    pub fn position_of(&self, song_id: SongId) -> Option<Position> {
        self.memberships
            .iter()
            .find(|m| m.song_id == song_id)
            .map(|m| m.position)
    }

    pub fn get(&self, position: Position) -> Option<&Membership> {
        self.index_of(position).map(|index| &self.memberships[index])
    }

    /// Ajoute un morceau en fin de liste (position N + 1)
    pub fn append(&mut self, song_id: SongId, added_at: DateTime<Utc>) -> Result<Membership> {
        if self.contains(song_id) {
            return Err(Error::DuplicateMembership {
                playlist_id: self.playlist_id,
                song_id,
            });
        }

        let membership = Membership::new(
            self.playlist_id,
            song_id,
            self.len() as Position + 1,
            added_at,
        );
        self.memberships.push(membership.clone());
        Ok(membership)
    }

    /// Retire la membership à `position` et referme le trou
    pub fn remove(&mut self, position: Position) -> Result<Membership> {
        let index = self
            .index_of(position)
            .ok_or_else(|| Error::PositionNotFound {
                playlist_id: self.playlist_id,
                position,
                len: self.len(),
            })?;

        let removed = self.memberships.remove(index);
        for membership in &mut self.memberships[index..] {
            membership.position -= 1;
        }
        Ok(removed)
    }

    /// Retire un morceau identifié par son id
    pub fn remove_song(&mut self, song_id: SongId) -> Result<Membership> {
        let position = self
            .position_of(song_id)
            .ok_or(Error::MembershipNotFound {
                playlist_id: self.playlist_id,
                song_id,
            })?;
        self.remove(position)
    }

    /// Déplace la membership de `from` vers `to` par décalage
    ///
    /// Les memberships situées entre les deux positions glissent d'un cran
    /// pour refermer la place libérée. `from == to` ne change rien.
    pub fn move_song(&mut self, from: Position, to: Position) -> Result<&[Membership]> {
        let len = self.len();
        for position in [from, to] {
            if self.index_of(position).is_none() {
                return Err(Error::InvalidPosition {
                    playlist_id: self.playlist_id,
                    position,
                    len,
                });
            }
        }

        if from != to {
            let (from_index, to_index) = (from as usize - 1, to as usize - 1);
            let membership = self.memberships.remove(from_index);
            self.memberships.insert(to_index, membership);

            let (start, end) = (from_index.min(to_index), from_index.max(to_index));
            for index in start..=end {
                self.memberships[index].position = index as Position + 1;
            }
        }

        Ok(&self.memberships)
    }

    /// Vérifie que les positions valent exactement 1..=N et qu'aucun morceau
    /// n'apparaît deux fois
    pub fn check_contiguous(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.len());
        for (index, membership) in self.memberships.iter().enumerate() {
            let expected = index as Position + 1;
            if membership.position != expected {
                return Err(self.violation(format!(
                    "song {} at position {}, expected {}",
                    membership.song_id, membership.position, expected
                )));
            }
            if membership.playlist_id != self.playlist_id {
                return Err(self.violation(format!(
                    "song {} belongs to playlist {}",
                    membership.song_id, membership.playlist_id
                )));
            }
            if !seen.insert(membership.song_id) {
                return Err(self.violation(format!(
                    "song {} appears more than once",
                    membership.song_id
                )));
            }
        }
        Ok(())
    }

    /// Calcule les changements depuis le chargement
    ///
    /// Ordre : suppressions, repositionnements, insertions, chacun trié par
    /// position.
    pub fn changes(&self) -> Vec<MembershipChange> {
        let current: HashSet<SongId> = self.memberships.iter().map(|m| m.song_id).collect();

        let mut removed: Vec<(SongId, Position)> = self
            .loaded
            .iter()
            .filter(|(song_id, _)| !current.contains(*song_id))
            .map(|(&song_id, &position)| (song_id, position))
            .collect();
        removed.sort_by_key(|&(_, position)| position);

        let mut changes: Vec<MembershipChange> = removed
            .into_iter()
            .map(|(song_id, position)| MembershipChange::Delete { song_id, position })
            .collect();
        for membership in &self.memberships {
            if let Some(&from) = self.loaded.get(&membership.song_id) {
                if from != membership.position {
                    changes.push(MembershipChange::Reposition {
                        song_id: membership.song_id,
                        from,
                        to: membership.position,
                    });
                }
            }
        }
        for membership in &self.memberships {
            if !self.loaded.contains_key(&membership.song_id) {
                changes.push(MembershipChange::Insert(membership.clone()));
            }
        }
        changes
    }

    /// Transforme la liste en lot de commit
    pub fn into_batch(self) -> PlaylistBatch {
        PlaylistBatch {
            playlist_id: self.playlist_id,
            expected_version: self.version,
            changes: self.changes(),
        }
    }

    fn index_of(&self, position: Position) -> Option<usize> {
        if position >= 1 && (position as usize) <= self.len() {
            Some(position as usize - 1)
        } else {
            None
        }
    }

    fn violation(&self, detail: String) -> Error {
        Error::InvariantViolation {
            playlist_id: self.playlist_id,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SongId = SongId::new(1);
    const B: SongId = SongId::new(2);
    const C: SongId = SongId::new(3);
    const D: SongId = SongId::new(4);

    fn playlist(songs: &[SongId]) -> OrderedList {
        let id = PlaylistId::new(7);
        let memberships = songs
            .iter()
            .enumerate()
            .map(|(i, &song)| Membership::new(id, song, i as Position + 1, Utc::now()))
            .collect();
        OrderedList::new(PlaylistSnapshot::new(id, 3, memberships))
    }

    fn order(list: &OrderedList) -> Vec<(SongId, Position)> {
        list.memberships()
            .iter()
            .map(|m| (m.song_id, m.position))
            .collect()
    }

    #[test]
    fn test_append_assigns_next_position() {
        let mut list = playlist(&[]);
        for (i, song) in [A, B, C].into_iter().enumerate() {
            let membership = list.append(song, Utc::now()).unwrap();
            assert_eq!(membership.position, i as Position + 1);
        }
        assert_eq!(order(&list), vec![(A, 1), (B, 2), (C, 3)]);
        list.check_contiguous().unwrap();
    }

    #[test]
    fn test_append_duplicate_is_rejected() {
        let mut list = playlist(&[A, B]);
        let before = order(&list);

        let err = list.append(B, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::DuplicateMembership { song_id, .. } if song_id == B));
        assert_eq!(order(&list), before);
        assert!(list.changes().is_empty());
    }

    #[test]
    fn test_remove_closes_gap() {
        let mut list = playlist(&[A, B, C, D]);
        let removed = list.remove(2).unwrap();
        assert_eq!(removed.song_id, B);
        assert_eq!(order(&list), vec![(A, 1), (C, 2), (D, 3)]);
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut list = playlist(&[A, B]);
        assert!(matches!(
            list.remove(0),
            Err(Error::PositionNotFound { position: 0, len: 2, .. })
        ));
        assert!(matches!(
            list.remove(3),
            Err(Error::PositionNotFound { position: 3, .. })
        ));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_move_backward_shifts_down() {
        let mut list = playlist(&[A, B, C, D]);
        list.move_song(4, 2).unwrap();
        assert_eq!(order(&list), vec![(A, 1), (D, 2), (B, 3), (C, 4)]);
    }

    #[test]
    fn test_move_forward_shifts_up() {
        let mut list = playlist(&[A, B, C, D]);
        list.move_song(1, 3).unwrap();
        assert_eq!(order(&list), vec![(B, 1), (C, 2), (A, 3), (D, 4)]);
    }

    #[test]
    fn test_move_same_position_is_noop() {
        let mut list = playlist(&[A, B, C]);
        let before = list.memberships().to_vec();
        list.move_song(2, 2).unwrap();
        assert_eq!(list.memberships(), before.as_slice());
        assert!(list.changes().is_empty());
    }

    #[test]
    fn test_move_round_trip_restores_order() {
        let songs = [A, B, C, D];
        for p in 1..=4 {
            for q in 1..=4 {
                let mut list = playlist(&songs);
                let before = order(&list);
                list.move_song(p, q).unwrap();
                list.check_contiguous().unwrap();
                list.move_song(q, p).unwrap();
                assert_eq!(order(&list), before, "move {p} -> {q} -> {p}");
            }
        }
    }

    #[test]
    fn test_move_invalid_position() {
        let mut list = playlist(&[A, B]);
        assert!(matches!(
            list.move_song(1, 3),
            Err(Error::InvalidPosition { position: 3, len: 2, .. })
        ));
        assert!(matches!(
            list.move_song(0, 1),
            Err(Error::InvalidPosition { position: 0, .. })
        ));
        assert_eq!(order(&list), vec![(A, 1), (B, 2)]);
    }

    #[test]
    fn test_remove_song_by_id() {
        let mut list = playlist(&[A, B, C]);
        list.remove_song(A).unwrap();
        assert_eq!(order(&list), vec![(B, 1), (C, 2)]);
        assert!(matches!(
            list.remove_song(D),
            Err(Error::MembershipNotFound { song_id, .. }) if song_id == D
        ));
    }

    #[test]
    fn test_changes_describe_renumbering() {
        let mut list = playlist(&[A, B, C, D]);
        list.remove(2).unwrap();

        let batch = list.clone().into_batch();
        assert_eq!(batch.expected_version, 3);
        assert_eq!(
            batch.changes,
            vec![
                MembershipChange::Delete {
                    song_id: B,
                    position: 2
                },
                MembershipChange::Reposition {
                    song_id: C,
                    from: 3,
                    to: 2
                },
                MembershipChange::Reposition {
                    song_id: D,
                    from: 4,
                    to: 3
                },
            ]
        );

        // B retiré puis réajouté : simple repositionnement en fin de liste
        list.append(B, Utc::now()).unwrap();
        let changes = list.changes();
        assert_eq!(changes.len(), 3);
        assert_eq!(
            changes[2],
            MembershipChange::Reposition {
                song_id: B,
                from: 2,
                to: 4
            }
        );
    }

    #[test]
    fn test_changes_for_new_song() {
        let mut list = playlist(&[A]);
        list.append(B, Utc::now()).unwrap();
        let changes = list.changes();
        assert_eq!(changes.len(), 1);
        assert!(matches!(&changes[0], MembershipChange::Insert(m) if m.song_id == B && m.position == 2));
    }

    #[test]
    fn test_check_contiguous_detects_gap() {
        let id = PlaylistId::new(1);
        let list = OrderedList::new(PlaylistSnapshot::new(
            id,
            0,
            vec![
                Membership::new(id, A, 1, Utc::now()),
                Membership::new(id, B, 3, Utc::now()),
            ],
        ));
        assert!(matches!(
            list.check_contiguous(),
            Err(Error::InvariantViolation { .. })
        ));
    }
}
