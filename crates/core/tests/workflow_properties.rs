//! Property tests: any sequence of transition requests and edits keeps the
//! stored data consistent, and refused requests leave no trace.

use proptest::prelude::*;
use thesis_core::{
    audit, Actor, Database, Role, Topic, TopicContent, TopicStatus, TransitionRequest, User,
};
use uuid::Uuid;

const TOPICS: usize = 3;
const STUDENTS: usize = 4;
const SLOTS: u32 = 2;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct World {
    db: Database,
    supervisor: Actor,
    dean: Actor,
    students: Vec<Actor>,
    topics: Vec<Uuid>,
}

impl World {
    fn new() -> Self {
        let db = Database::open_in_memory().unwrap();

        let supervisor = User::new("prof@uni.edu", "Anna", "Maj", Role::Supervisor);
        db.users().create(&supervisor).unwrap();
        db.capacity().ensure(supervisor.id, SLOTS).unwrap();
        let dean = User::new("dean@uni.edu", "Ewa", "Lis", Role::Dean);
        db.users().create(&dean).unwrap();

        let students = (0..STUDENTS)
            .map(|i| {
                let student = User::new(format!("s{i}@uni.edu"), format!("S{i}"), "Kowal", Role::Student);
                db.users().create(&student).unwrap();
                student.actor()
            })
            .collect();

        // The last topic starts without a field of study
        let topics = (0..TOPICS)
            .map(|i| {
                let field = (i + 1 < TOPICS).then_some(i as i64);
                db.workflow()
                    .create_topic(&supervisor.actor(), TopicContent::new(format!("Topic {i}")), field)
                    .unwrap()
                    .id
            })
            .collect();

        Self {
            db,
            supervisor: supervisor.actor(),
            dean: dean.actor(),
            students,
            topics,
        }
    }

    fn actor(&self, index: usize) -> Actor {
        match index {
            0 => self.supervisor,
            1 => self.dean,
            n => self.students[(n - 2) % STUDENTS],
        }
    }

    fn snapshot(&self) -> Vec<Topic> {
        self.topics
            .iter()
            .map(|id| self.db.topics().find_by_id(*id).unwrap().unwrap())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Step {
    Move {
        topic: usize,
        to: TopicStatus,
        actor: usize,
        student: Option<usize>,
    },
    EditContent {
        topic: usize,
        actor: usize,
    },
    SetField {
        topic: usize,
        actor: usize,
        field: Option<i64>,
    },
}

impl Step {
    fn topic(&self) -> usize {
        match self {
            Step::Move { topic, .. } | Step::EditContent { topic, .. } | Step::SetField { topic, .. } => *topic,
        }
    }
}

fn arb_status() -> impl Strategy<Value = TopicStatus> {
    prop_oneof![
        Just(TopicStatus::Hidden),
        Just(TopicStatus::Available),
        Just(TopicStatus::Reserved),
        Just(TopicStatus::StudentAccepted),
        Just(TopicStatus::Approved),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (
            0..TOPICS,
            arb_status(),
            0..STUDENTS + 2,
            proptest::option::of(0..STUDENTS),
        )
            .prop_map(|(topic, to, actor, student)| Step::Move {
                topic,
                to,
                actor,
                student,
            }),
        1 => (0..TOPICS, 0..STUDENTS + 2).prop_map(|(topic, actor)| Step::EditContent { topic, actor }),
        1 => (0..TOPICS, 0..STUDENTS + 2, proptest::option::of(0..5i64))
            .prop_map(|(topic, actor, field)| Step::SetField { topic, actor, field }),
    ]
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Stored data passes the audit after every step, successful writes bump
    /// the version by exactly one and refusals change nothing.
    #[test]
    fn random_requests_preserve_invariants(steps in prop::collection::vec(arb_step(), 1..40)) {
        let world = World::new();

        for (n, step) in steps.into_iter().enumerate() {
            let before = world.snapshot();
            let index = step.topic();
            let topic_id = world.topics[index];
            let old = &before[index];
            let engine = world.db.workflow();

            let result = match &step {
                Step::Move { to, actor, student, .. } => {
                    let mut request = TransitionRequest::new(topic_id, *to, world.actor(*actor));
                    if let Some(student) = student {
                        request = request.with_student(world.students[*student].id);
                    }
                    engine.request_transition(&request)
                }
                Step::EditContent { actor, .. } => engine.edit_content(
                    topic_id,
                    &world.actor(*actor),
                    old.version,
                    TopicContent::new(format!("Topic {index} rev {n}")),
                ),
                Step::SetField { actor, field, .. } => {
                    engine.set_field_of_study(topic_id, &world.actor(*actor), old.version, *field)
                }
            };
            let after = world.snapshot();
            let new = &after[index];

            match result {
                Ok(topic) => {
                    prop_assert_eq!(new, &topic);
                    match &step {
                        Step::Move { to, .. } => {
                            prop_assert_eq!(topic.status, *to);
                            let expected_version = if old.status == *to { old.version } else { old.version + 1 };
                            prop_assert_eq!(topic.version, expected_version);
                            if topic.status == TopicStatus::Approved {
                                prop_assert!(old.status == TopicStatus::StudentAccepted || old.status == TopicStatus::Approved);
                            }
                        }
                        Step::EditContent { .. } | Step::SetField { .. } => {
                            prop_assert_eq!(topic.status, old.status);
                            prop_assert_eq!(topic.version, old.version + 1);
                        }
                    }
                }
                Err(_) => prop_assert_eq!(&before, &after),
            }

            // Content is frozen once a student is accepted
            if matches!(old.status, TopicStatus::StudentAccepted | TopicStatus::Approved) {
                prop_assert_eq!(&new.content, &old.content);
            }
            // The field of study is fixed once the topic leaves Hidden
            if old.status != TopicStatus::Hidden && new.status != TopicStatus::Hidden {
                prop_assert_eq!(new.field_of_study_id, old.field_of_study_id);
            }

            // Other topics are never touched
            for (i, (b, a)) in before.iter().zip(&after).enumerate() {
                if i != index {
                    prop_assert_eq!(b, a);
                }
            }

            let violations = audit(&world.db).unwrap();
            prop_assert!(violations.is_empty(), "violations: {:?}", violations);

            let capacity = world.db.capacity().find(world.supervisor.id).unwrap().unwrap();
            prop_assert!(capacity.committed_count <= SLOTS);
        }
    }

    /// An approved topic refuses every other status for every actor.
    #[test]
    fn approved_is_terminal(to in arb_status(), actor in 0..STUDENTS + 2) {
        let world = World::new();
        let topic_id = world.topics[0];
        let student = world.students[0];
        let engine = world.db.workflow();

        engine.request_transition(&TransitionRequest::new(topic_id, TopicStatus::Available, world.supervisor)).unwrap();
        engine.assign_student(topic_id, &world.supervisor, student.id).unwrap();
        let approved = engine
            .request_transition(&TransitionRequest::new(topic_id, TopicStatus::Approved, student))
            .unwrap();

        let result = engine.request_transition(&TransitionRequest::new(topic_id, to, world.actor(actor)));
        let stored = world.db.topics().find_by_id(topic_id).unwrap().unwrap();
        prop_assert_eq!(&stored, &approved);
        if to != TopicStatus::Approved {
            let is_invalid_transition = matches!(result, Err(thesis_core::Error::InvalidTransition { .. }));
            prop_assert!(is_invalid_transition);
        }
    }
}
